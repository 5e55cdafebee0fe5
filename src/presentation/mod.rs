//! Controllers that fuse registry, radio and bus feeds into view models
//!
//! Each controller owns a [`HandleTable`](crate::subscription::HandleTable)
//! and is driven from a single task: feeds post into its inbox, and
//! `process_pending`/`step` apply those messages one at a time. Views are told
//! about every change through explicit trait calls.

pub mod dashboard;
pub mod headless;
pub mod tag_settings;

pub use dashboard::{
    CardKind, CardViewModel, CardsRouter, CardsView, DashboardController, DashboardUi,
    TagChartsModule,
};
pub use tag_settings::{
    AlertSettings, TagSettingsController, TagSettingsRouter, TagSettingsUi, TagSettingsView,
    TagSettingsViewModel,
};

use std::sync::Arc;

use crate::alerts::AlertService;
use crate::bluetooth::DeviceFeed;
use crate::error::StationError;
use crate::events::EventBus;
use crate::services::{BackgroundPersistence, ConnectionPersistence, Settings};
use crate::store::{CalibrationService, TagPersistence, TagRegistry};
use crate::subscription::{Sink, Subscription};

pub trait ErrorPresenter: Send + Sync {
    fn present(&self, error: &StationError);
}

pub trait PermissionPresenter: Send + Sync {
    fn present_no_location_permission(&self);
    fn present_no_push_notifications_permission(&self);
}

pub trait PermissionsManager: Send + Sync {
    /// Asks for location access; the answer arrives through `granted`
    fn request_location_permission(&self, granted: Sink<bool>) -> Subscription;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushAuthorization {
    NotDetermined,
    Authorized,
    Denied,
}

pub trait PushNotifications: Send + Sync {
    /// Fire-and-forget registration request
    fn register_for_remote_notifications(&self);
    fn authorization_status(&self, status: Sink<PushAuthorization>) -> Subscription;
}

pub trait MailComposer: Send + Sync {
    fn present(&self, email: &str, subject: &str, body: &str);
}

/// Diagnostic summary attached to feedback mail
pub trait InfoProvider: Send + Sync {
    /// May block; never called on the controller task
    fn summary(&self) -> String;
}

/// Collaborators shared by every controller
#[derive(Clone)]
pub struct Services {
    pub registry: Arc<dyn TagRegistry>,
    pub persistence: Arc<dyn TagPersistence>,
    pub calibration: Arc<dyn CalibrationService>,
    pub devices: Arc<dyn DeviceFeed>,
    pub alerts: Arc<dyn AlertService>,
    pub settings: Arc<dyn Settings>,
    pub connections: Arc<dyn ConnectionPersistence>,
    pub backgrounds: Arc<dyn BackgroundPersistence>,
    pub bus: EventBus,
    pub errors: Arc<dyn ErrorPresenter>,
    pub permission_presenter: Arc<dyn PermissionPresenter>,
    pub push: Arc<dyn PushNotifications>,
}
