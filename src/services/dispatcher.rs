//! Decision dispatch - turns decided scans into stock actions
//!
//! The disambiguator hands every decision to a `Dispatcher` and awaits it
//! before reading the next scan. Errors are reported back to the caller,
//! which logs them; they never change disambiguation state.

use crate::domain::{Decision, ScanKind, StockAction};
use crate::io::grocy::{GrocyError, StockApi};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no action configured for {0} scans")]
    Unmapped(ScanKind),
    #[error(transparent)]
    Grocy(#[from] GrocyError),
}

/// Capability invoked once per decision, never concurrently with itself
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, decision: &Decision) -> Result<(), DispatchError>;
}

#[async_trait]
impl<D: Dispatcher + ?Sized> Dispatcher for Arc<D> {
    async fn dispatch(&self, decision: &Decision) -> Result<(), DispatchError> {
        (**self).dispatch(decision).await
    }
}

#[async_trait]
impl<D: Dispatcher + ?Sized> Dispatcher for Box<D> {
    async fn dispatch(&self, decision: &Decision) -> Result<(), DispatchError> {
        (**self).dispatch(decision).await
    }
}

/// Maps single and double scans to their configured stock actions
pub struct ActionDispatcher<A> {
    api: Arc<A>,
    single: StockAction,
    double: Option<StockAction>,
}

impl<A: StockApi> ActionDispatcher<A> {
    pub fn new(api: Arc<A>, single: StockAction, double: Option<StockAction>) -> Self {
        Self { api, single, double }
    }

    /// Pairing only makes sense when a double scan leads somewhere
    pub fn double_scan_enabled(&self) -> bool {
        self.double.is_some()
    }

    pub fn action_for(&self, kind: ScanKind) -> Option<StockAction> {
        match kind {
            ScanKind::Single => Some(self.single),
            ScanKind::Double => self.double,
        }
    }
}

#[async_trait]
impl<A: StockApi> Dispatcher for ActionDispatcher<A> {
    async fn dispatch(&self, decision: &Decision) -> Result<(), DispatchError> {
        let action = self.action_for(decision.kind).ok_or(DispatchError::Unmapped(decision.kind))?;
        debug!(barcode = %decision.barcode, kind = %decision.kind, action = %action, "dispatch_action");
        self.api.perform(action, &decision.barcode).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::grocy::StockReceipt;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeApi {
        calls: Mutex<Vec<(StockAction, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl StockApi for FakeApi {
        async fn perform(
            &self,
            action: StockAction,
            barcode: &str,
        ) -> Result<StockReceipt, GrocyError> {
            self.calls.lock().push((action, barcode.to_string()));
            if self.fail {
                return Err(GrocyError::Status { status: 400, body: "unknown barcode".to_string() });
            }
            Ok(StockReceipt { product_id: "1".to_string(), transaction_id: "t".to_string() })
        }
    }

    #[tokio::test]
    async fn test_single_and_double_map_to_actions() {
        let api = Arc::new(FakeApi::default());
        let dispatcher =
            ActionDispatcher::new(api.clone(), StockAction::Consume, Some(StockAction::Add));
        assert!(dispatcher.double_scan_enabled());

        dispatcher.dispatch(&Decision::single("111")).await.unwrap();
        dispatcher.dispatch(&Decision::double("222")).await.unwrap();

        assert_eq!(
            *api.calls.lock(),
            vec![(StockAction::Consume, "111".to_string()), (StockAction::Add, "222".to_string())]
        );
    }

    #[tokio::test]
    async fn test_double_without_action_is_unmapped() {
        let api = Arc::new(FakeApi::default());
        let dispatcher = ActionDispatcher::new(api.clone(), StockAction::Consume, None);
        assert!(!dispatcher.double_scan_enabled());

        let err = dispatcher.dispatch(&Decision::double("222")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Unmapped(ScanKind::Double)));
        assert!(api.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_api_error_is_returned() {
        let api = Arc::new(FakeApi { fail: true, ..Default::default() });
        let dispatcher = ActionDispatcher::new(api, StockAction::Open, None);

        let err = dispatcher.dispatch(&Decision::single("333")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Grocy(GrocyError::Status { status: 400, .. })));
    }
}
