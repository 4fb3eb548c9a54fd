// Closure conversion and capture tests, across interpreted and compiled
// execution.

use taper::expression::*;
use taper::{Library, UserFunction, Value};

fn define_constant_maker(library: &mut Library) -> UserFunction {
    library
        .define("make-constant", |_| lambda(&["x"], lambda(&[], var("x"))))
        .unwrap()
}

fn as_closure(value: Value) -> std::sync::Arc<taper::Closure> {
    match value {
        Value::Closure(closure) => closure,
        other => panic!("expected a closure, got {:?}", other),
    }
}

#[test]
fn test_capture_and_independence() {
    // Scenario: (lambda (x) (lambda () x)).
    let mut library = Library::new();
    let maker = define_constant_maker(&mut library);

    let forty_two = as_closure(maker.invoke1(42).unwrap());
    let hello = as_closure(maker.invoke1("hello").unwrap());

    assert_eq!(forty_two.invoke0().unwrap(), Value::Int(42));
    assert_eq!(hello.invoke0().unwrap(), Value::str("hello"));
    // The closures are independent: invoking one does not disturb the
    // other.
    assert_eq!(forty_two.invoke0().unwrap(), Value::Int(42));
}

#[test]
fn test_capture_and_independence_after_compilation() {
    let mut library = Library::new();
    let maker = define_constant_maker(&mut library);

    // Profile with ints, then compile the whole unit.
    for i in 0..12 {
        as_closure(maker.invoke1(i).unwrap()).invoke0().unwrap();
    }
    assert!(maker.is_compiled());

    let forty_two = as_closure(maker.invoke1(42).unwrap());
    let hello = as_closure(maker.invoke1("hello").unwrap());
    assert_eq!(forty_two.invoke0().unwrap(), Value::Int(42));
    // The captured string fails the int specialization guard and runs
    // generically, with the same result.
    assert_eq!(hello.invoke0().unwrap(), Value::str("hello"));
}

#[test]
fn test_captured_values_are_copied_at_creation() {
    // (let (t 1) (let (c (lambda () t)) (begin (set! t 99) (c))))
    let body = let_(
        "t",
        const_(1),
        let_(
            "c",
            lambda(&[], var("t")),
            block(vec![set("t", const_(99)), call(var("c"), vec![])]),
        ),
    );
    let mut library = Library::new();
    let f = library.define("f", |_| lambda(&[], body)).unwrap();
    // The closure captured t's value at creation time.
    assert_eq!(f.invoke0().unwrap(), Value::Int(1));
}

#[test]
fn test_adder_closure() {
    let mut library = Library::new();
    let make_adder = library
        .define("make-adder", |_| {
            lambda(&["x"], lambda(&["y"], add(var("x"), var("y"))))
        })
        .unwrap();
    let add_five = as_closure(make_adder.invoke1(5).unwrap());
    assert_eq!(add_five.invoke1(Value::Int(3)).unwrap(), Value::Int(8));
    assert_eq!(add_five.invoke1(Value::Int(-5)).unwrap(), Value::Int(0));
}

#[test]
fn test_two_closures_share_one_free_variable() {
    // (lambda (x) (+ ((lambda () x)) ((lambda () x))))
    let mut library = Library::new();
    let f = library
        .define("f", |_| {
            lambda(
                &["x"],
                add(
                    call(lambda(&[], var("x")), vec![]),
                    call(lambda(&[], var("x")), vec![]),
                ),
            )
        })
        .unwrap();
    assert_eq!(f.invoke1(21).unwrap(), Value::Int(42));
}

#[test]
fn test_capture_through_two_nesting_levels() {
    // (lambda (x) (lambda () (lambda () x)))
    let mut library = Library::new();
    let f = library
        .define("f", |_| {
            lambda(&["x"], lambda(&[], lambda(&[], var("x"))))
        })
        .unwrap();
    let outer = as_closure(f.invoke1(7).unwrap());
    let inner = as_closure(outer.invoke0().unwrap());
    assert_eq!(inner.invoke0().unwrap(), Value::Int(7));
}

#[test]
fn test_capture_of_let_bound_variable() {
    // (lambda (x) (let (y (+ x 1)) (lambda () y)))
    let mut library = Library::new();
    let f = library
        .define("f", |_| {
            lambda(
                &["x"],
                let_("y", add(var("x"), const_(1)), lambda(&[], var("y"))),
            )
        })
        .unwrap();
    let closure = as_closure(f.invoke1(41).unwrap());
    assert_eq!(closure.invoke0().unwrap(), Value::Int(42));
}

#[test]
fn test_closure_unsupported_arity() {
    let mut library = Library::new();
    let maker = define_constant_maker(&mut library);
    let closure = as_closure(maker.invoke1(1).unwrap());
    let err = closure
        .invoke(&[Value::Int(1), Value::Int(2), Value::Int(3)])
        .unwrap_err();
    assert!(err.message().contains("unsupported call arity: 3"));
}

#[test]
fn test_closure_capture_template_is_ordered() {
    // Two free variables captured in first-reference order.
    let mut library = Library::new();
    let f = library
        .define("f", |_| {
            lambda(
                &["a", "b"],
                lambda(&[], sub(var("a"), var("b"))),
            )
        })
        .unwrap();
    let closure = as_closure(f.invoke2(10, 4).unwrap());
    assert_eq!(closure.captured(), &[Value::Int(10), Value::Int(4)]);
    assert_eq!(closure.invoke0().unwrap(), Value::Int(6));
}
