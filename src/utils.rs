use std::sync::Arc;

use parking_lot::Mutex;

use crate::errors;

/// A memoized by-need suspension. Forcing runs the pending computation
/// exactly once and caches the result; every later force is a clone of
/// the cached value. Observers can never see an unevaluated thunk,
/// because every use-site goes through `force`.
///
/// The lock is released while the pending computation runs, so a
/// computation may force other thunks freely. Re-entrant forcing of the
/// *same* thunk means the suspended value depends on itself, which is
/// an IR bug, and dies loudly.
pub struct Thunk<T>(Arc<Mutex<ThunkState<T>>>);

enum ThunkState<T> {
    Pending(Box<dyn FnOnce() -> T>),
    Forcing,
    Done(T),
}

impl<T: Clone> Thunk<T> {
    pub fn defer(f: impl FnOnce() -> T + 'static) -> Thunk<T> {
        Thunk(Arc::new(Mutex::new(ThunkState::Pending(Box::new(f)))))
    }

    /// An already-forced thunk.
    pub fn pure(value: T) -> Thunk<T> {
        Thunk(Arc::new(Mutex::new(ThunkState::Done(value))))
    }

    pub fn force(&self) -> T {
        let mut guard = self.0.lock();
        match std::mem::replace(&mut *guard, ThunkState::Forcing) {
            ThunkState::Done(value) => {
                let result = value.clone();
                *guard = ThunkState::Done(value);
                result
            }
            ThunkState::Pending(f) => {
                drop(guard);
                let value = f();
                *self.0.lock() = ThunkState::Done(value.clone());
                value
            }
            ThunkState::Forcing => errors::cyclic_thunk(line!()),
        }
    }
}

impl<T> Clone for Thunk<T> {
    fn clone(&self) -> Self {
        Thunk(self.0.clone())
    }
}

impl<T> std::fmt::Debug for Thunk<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "<thunk>")
    }
}

pub fn foldr<A, B, I>(fun: impl Fn(A, B) -> B, i: I, init: B) -> B
where
    I: IntoIterator<Item = A>,
    I::IntoIter: DoubleEndedIterator,
{
    i.into_iter().rev().fold(init, |acc, next| fun(next, acc))
}

#[cfg(test)]
mod utils_tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn thunk_runs_once() {
        let hits = Rc::new(Cell::new(0));
        let hits2 = hits.clone();
        let t = Thunk::defer(move || {
            hits2.set(hits2.get() + 1);
            41 + 1
        });
        assert_eq!(t.force(), 42);
        assert_eq!(t.force(), 42);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn pure_thunk_is_its_value() {
        assert_eq!(Thunk::pure("x").force(), "x");
    }

    #[test]
    fn foldr_folds_from_the_right() {
        let out = foldr(|next, acc: String| format!("({} {})", next, acc), vec!["a", "b"], String::from("z"));
        assert_eq!(out, "(a (b z))");
    }
}
