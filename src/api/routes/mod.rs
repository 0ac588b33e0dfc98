pub mod health;
pub mod history;
pub mod servers;
pub mod stats;
pub mod subscriptions;

use serde::Deserialize;

use crate::api::error::{ApiError, ApiResult};
use crate::storage::backend::QueryRange;
use crate::util;

/// `?server_id=&start_time=&end_time=` as sent by the sync bridge and the
/// portal frontend. Kept as strings so bad values get a JSON 400.
#[derive(Debug, Default, Deserialize)]
pub struct RangeParams {
    pub server_id: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

impl RangeParams {
    pub fn into_range(self) -> ApiResult<QueryRange> {
        let (Some(server_id), Some(start_time), Some(end_time)) =
            (self.server_id, self.start_time, self.end_time)
        else {
            return Err(ApiError::InvalidRequest(
                "server_id, start_time and end_time are required".to_string(),
            ));
        };

        let server_id = server_id
            .trim()
            .parse::<i64>()
            .map_err(|_| ApiError::InvalidRequest(format!("invalid server_id '{server_id}'")))?;
        let start = parse_time("start_time", &start_time)?;
        let end = parse_time("end_time", &end_time)?;

        if start > end {
            return Err(ApiError::InvalidRequest(
                "start_time must not be after end_time".to_string(),
            ));
        }

        Ok(QueryRange::new(server_id, start, end))
    }
}

fn parse_time(name: &str, raw: &str) -> ApiResult<chrono::DateTime<chrono::Utc>> {
    util::parse_timestamp(raw).ok_or_else(|| {
        ApiError::InvalidRequest(format!(
            "invalid {name} '{raw}', expected YYYY-MM-DD HH:MM:SS"
        ))
    })
}
