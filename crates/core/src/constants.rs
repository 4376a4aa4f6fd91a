//! Constants used throughout the care core crate.

use std::time::Duration;

/// Default Cloud Healthcare API root used to build the store base URL.
pub const DEFAULT_FHIR_API_ROOT: &str = "https://healthcare.googleapis.com/v1";

pub const DEFAULT_FHIR_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_TERMINOLOGY_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_OTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Whole-request deadline applied around every core call made by a server.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
pub const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

pub const DEFAULT_MAX_PAGE_SIZE: u32 = 100;
pub const MAX_PAGE_SIZE_LIMIT: u32 = 1000;

/// Encounters of one timeline gathered at the same time; each runs one search per visit type.
pub const DEFAULT_TIMELINE_CONCURRENCY: usize = 4;
pub const MAX_TIMELINE_CONCURRENCY: usize = 32;

pub const DEFAULT_REST_ADDR: &str = "0.0.0.0:3000";

/// Search parameter linking an encounter to its episode.
pub const EPISODE_OF_CARE_PARAM: &str = "episode-of-care";

/// Search parameter linking a clinical resource to its encounter.
pub const ENCOUNTER_PARAM: &str = "encounter";

/// Tracing target for the notification side channel.
pub const EVENTS_TARGET: &str = "care::events";
