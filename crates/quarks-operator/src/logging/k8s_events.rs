//! Utilities for publishing Kubernetes events

use std::error::Error;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::{
    controller,
    events::{Event, EventType, Recorder, Reporter},
};
use tracing::Instrument;

use super::controller::ReconcilerError;

const MAX_NOTE_LENGTH: usize = 1024;

/// Converts an [`Error`] into a publishable Kubernetes [`Event`]
pub(super) fn error_to_event<E: ReconcilerError>(err: &E) -> Event {
    // Walk the whole error chain, so that we get all the full reason for the error
    let mut full_msg = err.to_string();
    let mut source = err.source();
    while let Some(err) = source {
        full_msg.push_str(": ");
        full_msg.push_str(&err.to_string());
        source = err.source();
    }
    message::truncate_with_ellipsis(&mut full_msg, MAX_NOTE_LENGTH);

    Event {
        type_: EventType::Warning,
        reason: err.category().to_owned(),
        note: Some(full_msg),
        action: "Reconcile".to_owned(),
        secondary: err.secondary_object().map(ObjectReference::from),
    }
}

/// Reports an error coming from a controller to Kubernetes
///
/// This is intended to be executed on the log entries returned by
/// [`kube::runtime::Controller::run`]
#[tracing::instrument(skip(client))]
pub fn publish_controller_error_as_k8s_event<ReconcileErr, QueueErr>(
    client: &kube::Client,
    controller: &str,
    controller_error: &controller::Error<ReconcileErr, QueueErr>,
) where
    ReconcileErr: ReconcilerError,
    QueueErr: Error,
{
    let (error, obj) = match controller_error {
        controller::Error::ReconcilerFailed(err, obj) => (err, obj),
        // Other error types are intended for the operator administrator, and aren't linked to a
        // specific object
        _ => return,
    };
    let recorder = Recorder::new(
        client.clone(),
        Reporter {
            controller: controller.to_owned(),
            instance: None,
        },
    );
    let reference = ObjectReference::from(obj.clone());
    let event = error_to_event(error);
    // Run in the background
    tokio::spawn(
        async move {
            if let Err(err) = recorder.publish(&event, &reference).await {
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    "Failed to report error as K8s event"
                );
            }
        }
        .in_current_span(),
    );
}

mod message {
    /// Ensures that `msg` is at most `max_len` _bytes_ long
    ///
    /// If `msg` is longer than `max_len` then the extra text is replaced with an ellipsis.
    pub fn truncate_with_ellipsis(msg: &mut String, max_len: usize) {
        const ELLIPSIS: char = '…';
        const ELLIPSIS_LEN: usize = ELLIPSIS.len_utf8();
        if msg.len() > max_len {
            let start = find_start_of_char(msg, max_len.saturating_sub(ELLIPSIS_LEN));
            msg.truncate(start);
            if ELLIPSIS_LEN <= max_len {
                msg.push(ELLIPSIS);
            }
        }
        debug_assert!(msg.len() <= max_len);
    }

    fn find_start_of_char(s: &str, mut pos: usize) -> usize {
        while !s.is_char_boundary(pos) {
            pos -= 1;
        }
        pos
    }

}
