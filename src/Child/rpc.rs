// Request/response slot allowing one outstanding request at a time.
//
// With a single outstanding request the response needs no identifier: the
// next response to arrive answers the request in flight.

use crate::Core::Monitor::Monitor;

struct SlotState<T> {
    waiting: bool,
    response: Option<T>,
}

pub struct ResponseSlot<T> {
    state: Monitor<SlotState<T>>,
}

impl<T> Default for ResponseSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResponseSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Monitor::new(SlotState {
                waiting: false,
                response: None,
            }),
        }
    }

    /// Issue a request with `send` and block until its response is delivered.
    ///
    /// Callers arriving while another request is outstanding block until that
    /// request has been answered. `send` runs with the slot claimed; it must
    /// not block on this slot.
    pub fn call<F>(&self, send: F) -> T
    where
        F: FnOnce(),
    {
        let mut state = self.state.lock();
        self.state.wait_while(&mut state, |s| s.waiting);
        state.waiting = true;
        state.response = None;

        send();

        loop {
            if let Some(response) = state.response.take() {
                state.waiting = false;
                self.state.notify_all();
                return response;
            }
            self.state.wait(&mut state);
        }
    }

    /// Hand a response to the outstanding request.
    ///
    /// Returns `false`, dropping the response, if no request is waiting or a
    /// response is already pending.
    pub fn deliver(&self, response: T) -> bool {
        let mut state = self.state.lock();
        if !state.waiting || state.response.is_some() {
            return false;
        }
        state.response = Some(response);
        self.state.notify_all();
        true
    }

    pub fn is_waiting(&self) -> bool {
        self.state.lock().waiting
    }
}
