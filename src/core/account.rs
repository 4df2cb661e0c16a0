// src/core/account.rs

//! The three account-data blobs the daemon persists server-side: the watched
//! policy rooms, the explicit protect list, and the abuse-report cursor.

use crate::client::ChatClient;
use crate::core::errors::PalisadeError;
use serde::{Deserialize, Serialize};

pub const WATCHED_LISTS_EVENT: &str = "org.palisade.watched_lists";
pub const PROTECTED_ROOMS_EVENT: &str = "org.palisade.protected_rooms";
pub const REPORT_CURSOR_EVENT: &str = "org.palisade.report_poll_cursor";

/// Canonical references of the policy rooms to watch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchedLists {
    #[serde(default)]
    pub references: Vec<String>,
}

/// The explicitly protected rooms (the protect-all-joined policy is layered
/// on top of this at startup and is not persisted).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtectedRoomsBlob {
    #[serde(default)]
    pub rooms: Vec<String>,
}

/// Opaque pagination offset into the server's report stream.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportCursor {
    #[serde(default)]
    pub from: i64,
}

async fn load<T>(client: &dyn ChatClient, event_type: &str) -> Result<T, PalisadeError>
where
    T: serde::de::DeserializeOwned + Default,
{
    match client.get_account_data(event_type).await? {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(T::default()),
    }
}

async fn store<T: Serialize>(
    client: &dyn ChatClient,
    event_type: &str,
    blob: &T,
) -> Result<(), PalisadeError> {
    client
        .put_account_data(event_type, serde_json::to_value(blob)?)
        .await?;
    Ok(())
}

pub async fn load_watched_lists(client: &dyn ChatClient) -> Result<WatchedLists, PalisadeError> {
    load(client, WATCHED_LISTS_EVENT).await
}

pub async fn store_watched_lists(
    client: &dyn ChatClient,
    blob: &WatchedLists,
) -> Result<(), PalisadeError> {
    store(client, WATCHED_LISTS_EVENT, blob).await
}

pub async fn load_protected_rooms(
    client: &dyn ChatClient,
) -> Result<ProtectedRoomsBlob, PalisadeError> {
    load(client, PROTECTED_ROOMS_EVENT).await
}

pub async fn store_protected_rooms(
    client: &dyn ChatClient,
    blob: &ProtectedRoomsBlob,
) -> Result<(), PalisadeError> {
    store(client, PROTECTED_ROOMS_EVENT, blob).await
}

pub async fn load_report_cursor(client: &dyn ChatClient) -> Result<ReportCursor, PalisadeError> {
    load(client, REPORT_CURSOR_EVENT).await
}

pub async fn store_report_cursor(
    client: &dyn ChatClient,
    cursor: ReportCursor,
) -> Result<(), PalisadeError> {
    store(client, REPORT_CURSOR_EVENT, &cursor).await
}
