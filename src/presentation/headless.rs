//! Log-only surfaces for running the station without a screen
use log::{error, info, warn};
use std::sync::Arc;
use time::OffsetDateTime;

use super::dashboard::{
    CardKind, CardViewModel, CardsRouter, CardsView, DashboardUi, TagChartsModule,
};
use super::{
    ErrorPresenter, InfoProvider, MailComposer, PermissionPresenter, PermissionsManager,
    PushAuthorization, PushNotifications,
};
use crate::alerts::AlertState;
use crate::config::StationConfig;
use crate::error::StationError;
use crate::models::{TagRecord, WebTagRecord};
use crate::subscription::{Sink, Subscription};
use crate::utils::format_datetime;

/// Writes every view update and routing request to the log
///
/// Permission prompts are answered as granted so the daemons keep running.
#[derive(Debug, Default)]
pub struct LogUi;

impl LogUi {
    pub fn dashboard(self: &Arc<Self>, config: &StationConfig) -> DashboardUi {
        DashboardUi {
            view: self.clone(),
            router: self.clone(),
            charts: Some(self.clone()),
            permissions_manager: self.clone(),
            mail: self.clone(),
            info: self.clone(),
            feedback_email: config.feedback_email.clone(),
            feedback_subject: config.feedback_subject.clone(),
        }
    }

    fn log_card(card: &CardViewModel) {
        let name = if card.name.is_empty() { &card.uuid } else { &card.name };
        let kind = match card.kind {
            CardKind::Ruuvi => "tag",
            CardKind::Web => "web tag",
        };
        info!("Card {} ({}):", name, kind);
        if let Some(celsius) = card.celsius {
            info!("  Temperature: {:.2}°C", celsius);
        }
        if let Some(humidity) = card.relative_humidity {
            info!("  Humidity: {:.2}%", humidity);
        }
        if let Some(pressure) = card.pressure {
            info!("  Pressure: {:.2} hPa", pressure);
        }
        if let Some(counter) = card.movement_counter {
            info!("  Movement counter: {}", counter);
        }
        if let Some(rssi) = card.rssi {
            info!("  RSSI: {} dBm", rssi);
        }
        if card.alert_state == AlertState::Firing {
            warn!("  Alert firing");
        }
        if let Some(date) = card.date {
            info!("  Updated: {}", format_datetime(&date));
        }
    }
}

impl CardsView for LogUi {
    fn set_cards(&self, cards: &[CardViewModel]) {
        info!("Showing {} cards", cards.len());
        for card in cards {
            Self::log_card(card);
        }
    }

    fn card_did_change(&self, card: &CardViewModel) {
        Self::log_card(card);
    }

    fn scroll_to(&self, index: usize, _immediately: bool) {
        info!("Focused card {}", index);
    }

    fn show_bluetooth_disabled(&self) {
        warn!("Bluetooth is not powered on");
    }

    fn show_swipe_hint(&self) {}

    fn show_web_tag_api_limit_exceeded(&self) {
        warn!("Weather provider API limit exceeded");
    }

    fn show_reverse_geocoding_failed(&self) {
        warn!("Reverse geocoding failed");
    }

    fn show_keep_connection_dialog(&self, uuid: &str) {
        info!("Charts of {} need a kept connection", uuid);
    }
}

impl CardsRouter for LogUi {
    fn open_menu(&self) {}

    fn dismiss_menu(&self) {}

    fn open_discover(&self) {
        warn!("No tags registered; add tag MACs to RUUVI_TAGS");
    }

    fn dismiss_discover(&self) {}

    fn open_settings(&self) {}

    fn open_about(&self) {}

    fn open_ruuvi_website(&self) {
        info!("https://ruuvi.com");
    }

    fn open_tag_settings(&self, tag: &TagRecord, humidity: Option<f64>) {
        info!("Settings of {} requested (humidity {:?})", tag.name, humidity);
    }

    fn open_web_tag_settings(&self, tag: &WebTagRecord) {
        info!("Settings of web tag {} requested", tag.name);
    }

    fn open_tag_charts(&self) {}
}

impl TagChartsModule for LogUi {
    fn configure(&self, _uuid: &str) {}
}

impl ErrorPresenter for LogUi {
    fn present(&self, error: &StationError) {
        error!("{}", error);
    }
}

impl PermissionPresenter for LogUi {
    fn present_no_location_permission(&self) {
        warn!("Location permission is missing");
    }

    fn present_no_push_notifications_permission(&self) {
        warn!("Push notification permission is missing");
    }
}

impl PermissionsManager for LogUi {
    fn request_location_permission(&self, granted: Sink<bool>) -> Subscription {
        granted.send(true);
        Subscription::noop()
    }
}

impl PushNotifications for LogUi {
    fn register_for_remote_notifications(&self) {}

    fn authorization_status(&self, status: Sink<PushAuthorization>) -> Subscription {
        status.send(PushAuthorization::Authorized);
        Subscription::noop()
    }
}

impl MailComposer for LogUi {
    fn present(&self, email: &str, subject: &str, body: &str) {
        info!("Feedback to {} ({}):{}", email, subject, body);
    }
}

impl InfoProvider for LogUi {
    fn summary(&self) -> String {
        format!(
            "{} {} at {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            format_datetime(&OffsetDateTime::now_utc())
        )
    }
}
