//! Reports what became of each reconcile and decides when a failed object is looked at again.
//!
//! Both controllers share [`report_controller_reconciled`] for their output stream and
//! [`error_policy`] for failed reconciles.
use std::{error::Error, sync::Arc, time::Duration};

use kube::{
    Resource, ResourceExt,
    core::DynamicObject,
    runtime::{
        controller::{self, Action},
        reflector::ObjectRef,
    },
};

use crate::logging::k8s_events::publish_controller_error_as_k8s_event;

/// Requeue delay after reconcile errors which may resolve themselves.
pub const ERROR_REQUEUE_AFTER: Duration = Duration::from_secs(5);

/// Classifies the errors of a reconciler.
pub trait ReconcilerError: Error {
    /// `PascalCase`d name of the error variant, used as the reason of published events.
    fn category(&self) -> &'static str;

    /// Whether a later attempt may succeed without the object changing.
    ///
    /// Errors found in the object itself, like a missing label or an unknown state, only go away
    /// with the next change of the object.
    fn is_retryable(&self) -> bool {
        true
    }

    /// The secret the error was found in, attached to the published event.
    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        None
    }
}

/// Requeues retryable errors after [`ERROR_REQUEUE_AFTER`], other errors wait for a change.
pub fn error_policy<K, E, Ctx>(object: Arc<K>, error: &E, _ctx: Arc<Ctx>) -> Action
where
    K: Resource,
    E: ReconcilerError + 'static,
{
    let retryable = error.is_retryable();
    tracing::warn!(
        object = %object.name_any(),
        category = error.category(),
        retryable,
        error = error as &dyn Error,
        "Reconcile failed"
    );
    if retryable {
        Action::requeue(ERROR_REQUEUE_AFTER)
    } else {
        Action::await_change()
    }
}

/// Logs each item of [`kube::runtime::Controller::run`] and publishes reconcile errors as
/// warning [`Event`]s on the failed object.
///
/// [`Event`]: `k8s_openapi::api::events::v1::Event`
pub fn report_controller_reconciled<K, ReconcileErr, QueueErr>(
    client: &kube::Client,
    controller_name: &str,
    result: &Result<(ObjectRef<K>, Action), controller::Error<ReconcileErr, QueueErr>>,
) where
    K: Resource,
    ReconcileErr: ReconcilerError,
    QueueErr: Error,
{
    let error = match result {
        Ok((object, action)) => {
            tracing::info!(
                controller.name = controller_name,
                %object,
                ?action,
                "Reconciled object"
            );
            return;
        }
        Err(error) => error,
    };
    match error {
        controller::Error::ReconcilerFailed(reconcile_error, object) => tracing::error!(
            controller.name = controller_name,
            %object,
            category = reconcile_error.category(),
            retryable = reconcile_error.is_retryable(),
            error = reconcile_error as &dyn Error,
            "Failed to reconcile object",
        ),
        // Queue and runner errors are not linked to an object.
        _ => tracing::error!(
            controller.name = controller_name,
            error = error as &dyn Error,
            "Controller failed",
        ),
    }
    publish_controller_error_as_k8s_event(client, controller_name, error);
}
