//! Debug log fan-out for [`LogNotifications`] receivers.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

use crate::commands::LogNotifications;

/// Registered debug log receivers of one endpoint
#[derive(Default)]
pub(crate) struct DebugLog
{
    receivers: Mutex<Vec<Arc<dyn LogNotifications>>>,
}

impl DebugLog
{
    pub(crate) fn add(&self, receiver: Arc<dyn LogNotifications>)
    {
        let mut receivers = self.receivers.lock().unwrap_or_else(PoisonError::into_inner);
        if !receivers.iter().any(|r| Arc::ptr_eq(r, &receiver)) {
            receivers.push(receiver);
        }
    }

    /// Returns whether the receiver was registered.
    pub(crate) fn remove(&self, receiver: &Arc<dyn LogNotifications>) -> bool
    {
        let mut receivers = self.receivers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = receivers.len();
        receivers.retain(|r| !Arc::ptr_eq(r, receiver));
        receivers.len() != before
    }

    /// Log a message built by `message`. The message is only formatted if
    /// someone listens.
    pub(crate) fn emit<F>(&self, message: F)
    where
        F: FnOnce() -> String,
    {
        let receivers = self.receivers.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if receivers.is_empty() && !tracing::enabled!(tracing::Level::TRACE) {
            return;
        }
        let text = message();
        trace!(target: "tether_protocol::wire", "{text}");
        for receiver in &receivers {
            receiver.notify_log_message(&text);
        }
    }
}

impl std::fmt::Debug for DebugLog
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        let count = self.receivers.lock().map_or(0, |r| r.len());
        f.debug_struct("DebugLog").field("receivers", &count).finish()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    impl LogNotifications for Collect
    {
        fn notify_log_message(&self, message: &str)
        {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn test_receivers_added_once_and_removed()
    {
        let log = DebugLog::default();
        let collect = Arc::new(Collect::default());
        let receiver: Arc<dyn LogNotifications> = collect.clone();

        log.add(Arc::clone(&receiver));
        log.add(Arc::clone(&receiver));
        log.emit(|| "hello".to_string());
        assert_eq!(*collect.0.lock().unwrap(), vec!["hello".to_string()]);

        assert!(log.remove(&receiver));
        assert!(!log.remove(&receiver));
        log.emit(|| "dropped".to_string());
        assert_eq!(collect.0.lock().unwrap().len(), 1);
    }
}
