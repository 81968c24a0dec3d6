// ============================================================================
// SYNCHRONOUS OBSERVER LIST
// ============================================================================
//
// The annotation store and the viewport both notify their consumers
// synchronously on every mutation (overlay repaint, debounced persistence).
// Listeners run on the UI thread in subscription order.

/// Handle returned by [`Subscribers::subscribe`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionId(usize);

/// A list of boxed callbacks invoked synchronously with each event.
pub struct Subscribers<E> {
    next_id: usize,
    listeners: Vec<(usize, Box<dyn FnMut(&E)>)>,
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Self {
            next_id: 0,
            listeners: Vec::new(),
        }
    }
}

impl<E> Subscribers<E> {
    pub fn subscribe(&mut self, listener: Box<dyn FnMut(&E)>) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.push((id, listener));
        SubscriptionId(id)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.listeners.retain(|(lid, _)| *lid != id.0);
    }

    pub fn notify(&mut self, event: &E) {
        for (_, listener) in &mut self.listeners {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
