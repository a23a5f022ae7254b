//! Main-content values the session shows for server intents.

use attractap_core::DisplayContent;
use attractap_core::constants::{
    COLOR_BLUE, COLOR_GREEN, COLOR_LIGHT_GRAY, COLOR_PURPLE, COLOR_RED, COLOR_YELLOW,
};
use attractap_protocol::payloads::CardCheckingPayload;

/// Prompt shown while waiting for a card tap.
///
/// `None` for card-checking modes this reader does not know; card checking
/// stays off for those.
pub fn card_checking(payload: &CardCheckingPayload) -> Option<DisplayContent> {
    let username = payload.username();
    let content = match payload {
        CardCheckingPayload::ToggleResourceUsage {
            resource,
            is_active,
            has_active_maintenance,
            ..
        } => {
            let resource_name = resource
                .as_ref()
                .and_then(|resource| resource.name.clone())
                .unwrap_or_default();
            let (message, color) = if *is_active {
                ("Tap to end usage", COLOR_RED)
            } else if *has_active_maintenance {
                ("Maintenance in progress", COLOR_RED)
            } else {
                ("Tap to start using", COLOR_GREEN)
            };
            let sub_message = match (*is_active, username) {
                (true, Some(username)) => format!("{resource_name} ({username})"),
                _ => resource_name,
            };
            DisplayContent::card_checking(message)
                .with_sub_message(sub_message)
                .with_text_color(color)
        }
        CardCheckingPayload::EnrollNfcCard { .. } => {
            DisplayContent::card_checking("Tap to enroll NFC card")
                .with_sub_message(format!("({})", username.unwrap_or_default()))
                .with_text_color(COLOR_BLUE)
                .with_cancel_button()
        }
        CardCheckingPayload::ResetNfcCard { card, .. } => {
            let card_id = card
                .as_ref()
                .and_then(|card| card.id.as_deref())
                .unwrap_or("?");
            DisplayContent::card_checking("Tap to reset NFC card")
                .with_sub_message(format!("({} #{card_id})", username.unwrap_or_default()))
                .with_text_color(COLOR_PURPLE)
                .with_cancel_button()
        }
        CardCheckingPayload::Unknown => return None,
    };
    Some(content)
}

/// Notice shown when the reader loses its server.
pub fn unavailable_notice() -> DisplayContent {
    DisplayContent::error("Sorry, this reader is currently not available")
        .with_sub_message("please contact an attraccess administrator")
        .with_text_color(COLOR_YELLOW)
        .with_sub_text_color(COLOR_LIGHT_GRAY)
}
