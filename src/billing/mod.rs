//! Billing: subscription state, webhook reconciliation and entitlements.

pub mod entitlement;
pub mod gateway;
pub mod model;
pub mod reconciler;
pub mod signature;

pub use entitlement::Entitlements;
pub use gateway::{CheckoutGateway, StripeGateway, SubscriptionGateway};
pub use model::{EventKind, Plan, SubscriptionDetails, SubscriptionRecord, WebhookEvent};
pub use reconciler::{ReconcileOutcome, SubscriptionReconciler};
pub use signature::verify_signature;
