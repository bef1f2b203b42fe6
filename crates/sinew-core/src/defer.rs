use std::{cell::RefCell, collections::BTreeMap, fmt, mem, rc::Rc};

///
/// ErrorPayload
///
/// Rejection payload carried by a deferred value: either a single message
/// or a per-field message map, exactly as persistence collaborators
/// report failures.
///

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorPayload {
    Message(String),
    Fields(BTreeMap<String, Vec<String>>),
}

impl ErrorPayload {
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    #[must_use]
    pub fn field(name: impl Into<String>, message: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(name.into(), vec![message.into()]);

        Self::Fields(fields)
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(message) => write!(f, "{message}"),
            Self::Fields(fields) => {
                for (i, (name, messages)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{name}: {}", messages.join(", "))?;
                }
                Ok(())
            }
        }
    }
}

type Callback<T> = Box<dyn FnOnce(&Result<T, ErrorPayload>)>;

enum State<T> {
    Pending(Vec<Callback<T>>),
    Settled(Rc<Result<T, ErrorPayload>>),
}

///
/// Deferred
///
/// Single-threaded settle-once deferred value. Settlement runs pending
/// callbacks synchronously, re-entering the mutation path; callbacks
/// registered after settlement run immediately. A second settlement is
/// ignored with a diagnostic.
///

pub struct Deferred<T> {
    state: Rc<RefCell<State<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let settled = self.is_settled();
        f.debug_struct("Deferred").field("settled", &settled).finish()
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deferred<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(State::Pending(Vec::new()))),
        }
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(&*self.state.borrow(), State::Settled(_))
    }

    /// The settled outcome, if any.
    #[must_use]
    pub fn peek(&self) -> Option<Rc<Result<T, ErrorPayload>>> {
        match &*self.state.borrow() {
            State::Settled(outcome) => Some(Rc::clone(outcome)),
            State::Pending(_) => None,
        }
    }

    pub fn resolve(&self, value: T) {
        self.settle(Ok(value));
    }

    pub fn reject(&self, error: ErrorPayload) {
        self.settle(Err(error));
    }

    fn settle(&self, outcome: Result<T, ErrorPayload>) {
        let callbacks = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                State::Pending(callbacks) => {
                    let callbacks = mem::take(callbacks);
                    *state = State::Settled(Rc::new(outcome));
                    callbacks
                }
                State::Settled(_) => {
                    log::debug!("deferred value settled more than once; ignoring");
                    return;
                }
            }
        };

        let settled = match &*self.state.borrow() {
            State::Settled(outcome) => Rc::clone(outcome),
            State::Pending(_) => return,
        };
        for callback in callbacks {
            callback(&settled);
        }
    }

    /// Register a settlement callback.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: FnOnce(&Result<T, ErrorPayload>) + 'static,
    {
        let settled = match &mut *self.state.borrow_mut() {
            State::Pending(callbacks) => {
                callbacks.push(Box::new(callback));
                return;
            }
            State::Settled(outcome) => Rc::clone(outcome),
        };
        callback(&settled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn callbacks_run_on_settlement() {
        let deferred: Deferred<u32> = Deferred::new();
        let hits = Rc::new(Cell::new(0));

        let seen = Rc::clone(&hits);
        deferred.subscribe(move |outcome| {
            assert_eq!(*outcome, Ok(7));
            seen.set(seen.get() + 1);
        });
        assert_eq!(hits.get(), 0);

        deferred.resolve(7);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn late_subscription_runs_immediately() {
        let deferred: Deferred<u32> = Deferred::new();
        deferred.reject(ErrorPayload::message("nope"));

        let hits = Rc::new(Cell::new(0));
        let seen = Rc::clone(&hits);
        deferred.subscribe(move |outcome| {
            assert!(outcome.is_err());
            seen.set(seen.get() + 1);
        });
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn second_settlement_is_ignored() {
        let deferred: Deferred<u32> = Deferred::new();
        deferred.resolve(1);
        deferred.resolve(2);

        assert_eq!(deferred.peek().as_deref(), Some(&Ok(1)));
    }
}
