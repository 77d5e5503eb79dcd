//! Station directory over HTTP

use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, Url};
use std::time::Duration;

use crate::error::NetworkError;
use crate::protocol::{
    parse_broadcast_metadata, parse_queue, parse_skip_response, parse_slash_list, parse_vote_response, StationList,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Key in `/broadcast_metadata` holding the broadcast start (unix seconds)
const START_TIME_KEY: &str = "START_TIME_S";

/// Tracks and queue of one station
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationData {
    pub tracks: Vec<String>,
    /// Display order (next to play first)
    pub queued: Vec<String>,
}

/// Broadcast-wide facts from `/broadcast_metadata`
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastInfo {
    pub started_at: Option<DateTime<Utc>>,
}

impl BroadcastInfo {
    /// How long the broadcast has been running at `now`
    pub fn running_for(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.started_at.map(|start| now.signed_duration_since(start))
    }
}

/// `"3 days, 4 hours, 5 minutes"`, dropping zero units
pub fn format_uptime(uptime: chrono::Duration) -> String {
    let total_minutes = uptime.num_minutes().max(0);
    let days = total_minutes / (60 * 24);
    let hours = (total_minutes / 60) % 24;
    let minutes = total_minutes % 60;

    let parts: Vec<String> = [(days, "day"), (hours, "hour"), (minutes, "minute")]
        .into_iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, unit)| format!("{} {}{}", n, unit, if n == 1 { "" } else { "s" }))
        .collect();

    if parts.is_empty() {
        "less than a minute".to_string()
    } else {
        parts.join(", ")
    }
}

/// Client for the radio server's HTTP endpoints
#[derive(Debug, Clone)]
pub struct StationDirectory {
    client: Client,
    base: Url,
}

impl StationDirectory {
    pub fn new(base_url: &str) -> Result<Self, NetworkError> {
        let base = Url::parse(base_url).map_err(|e| NetworkError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(NetworkError::InvalidUrl(base_url.to_string()));
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
        Ok(Self { client, base })
    }

    /// `{base}/{segments...}` with each segment escaped
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_text(&self, segments: &[&str]) -> Result<String, NetworkError> {
        let url = self.endpoint(segments);
        tracing::debug!("GET {}", url);

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::RequestFailed(format!("{} returned {}", url, status)));
        }
        Ok(response.text().await?)
    }

    /// `GET /station_list`
    pub async fn station_list(&self) -> Result<Vec<String>, NetworkError> {
        let url = self.endpoint(&["station_list"]);
        let response = self.client.get(url).send().await?.error_for_status()?;
        let list: StationList = response.json().await?;
        Ok(list.stations)
    }

    /// `GET /audio_list/{station}`
    pub async fn track_list(&self, station: &str) -> Result<Vec<String>, NetworkError> {
        Ok(parse_slash_list(&self.get_text(&["audio_list", station]).await?))
    }

    /// `GET /audio_queue/{station}`, in display order
    pub async fn queue(&self, station: &str) -> Result<Vec<String>, NetworkError> {
        Ok(parse_queue(&self.get_text(&["audio_queue", station]).await?))
    }

    /// Track list and queue together
    pub async fn station_data(&self, station: &str) -> Result<StationData, NetworkError> {
        let (tracks, queued) = tokio::try_join!(self.track_list(station), self.queue(station))?;
        Ok(StationData { tracks, queued })
    }

    /// `GET /audio_req/{station}/{track}`; returns the updated queue
    pub async fn request_track(&self, station: &str, track: &str) -> Result<Vec<String>, NetworkError> {
        let body = self.get_text(&["audio_req", station, track]).await?;
        parse_vote_response(&body).ok_or_else(|| NetworkError::Rejected(format!("request for {} refused", track)))
    }

    /// `GET /skip_track/{station}`
    pub async fn skip(&self, station: &str) -> Result<(), NetworkError> {
        let body = self.get_text(&["skip_track", station]).await?;
        parse_skip_response(&body).map_err(NetworkError::Rejected)
    }

    /// `GET /broadcast_metadata`
    pub async fn broadcast_info(&self) -> Result<BroadcastInfo, NetworkError> {
        let body = self.get_text(&["broadcast_metadata"]).await?;
        let values = parse_broadcast_metadata(&body);
        let started_at = values
            .get(START_TIME_KEY)
            .and_then(|secs| Utc.timestamp_opt(*secs as i64, 0).single());
        Ok(BroadcastInfo { started_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_urls() {
        let directory = StationDirectory::new("https://radio.example.com/").unwrap();
        assert_eq!(
            directory.endpoint(&["audio_req", "lofi", "Song A/B"]).as_str(),
            "https://radio.example.com/audio_req/lofi/Song%20A%2FB"
        );
        assert_eq!(
            directory.endpoint(&["station_list"]).as_str(),
            "https://radio.example.com/station_list"
        );
    }

    #[test]
    fn test_rejects_bad_base() {
        assert!(StationDirectory::new("radio.example.com").is_err());
        assert!(StationDirectory::new("mailto:someone@example.com").is_err());
    }

    #[test]
    fn test_uptime() {
        let info = BroadcastInfo {
            started_at: Utc.timestamp_opt(1_700_000_000, 0).single(),
        };
        let now = Utc.timestamp_opt(1_700_000_000 + 86_400 + 2 * 3_600 + 60, 0).single().unwrap();
        let uptime = info.running_for(now).unwrap();
        assert_eq!(format_uptime(uptime), "1 day, 2 hours, 1 minute");
        assert_eq!(format_uptime(chrono::Duration::seconds(30)), "less than a minute");
        assert_eq!(BroadcastInfo { started_at: None }.running_for(now), None);
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let directory = StationDirectory::new(&format!("http://{}", addr)).unwrap();
        assert!(matches!(
            directory.station_list().await,
            Err(NetworkError::RequestFailed(_))
        ));
    }
}
