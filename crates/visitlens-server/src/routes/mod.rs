pub mod conversions;
pub mod events;
pub mod health;
pub mod metrics;
pub mod pageviews;
pub mod reports;
pub mod sessions;
pub mod summary;
pub mod timeframes;
pub mod visitors;

use axum::http::HeaderMap;

use visitlens_core::event::TenantScope;

use crate::error::AppError;

/// Header carrying the caller's user id, set by the upstream auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Build the tenant scope for a management call. Requests without a user id
/// never reach the store.
pub fn owner_scope(headers: &HeaderMap, site_id: &str) -> Result<TenantScope, AppError> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(AppError::Unauthorized)?;
    Ok(TenantScope::new(site_id, user_id))
}
