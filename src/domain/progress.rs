//! Progress events emitted while a chart request moves through the pipeline,
//! and their wire representation.

use serde::Serialize;

use super::chart::CacheKey;

const DATAPACK_PHASE_START: u8 = 10;
const DATAPACK_PHASE_SPAN: u64 = 30;

/// One step of a chart request's lifecycle.
///
/// `Complete` and `Error` are terminal: nothing follows them on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Initializing,
    /// `step` is `None` for the coarse "datapacks are being prepared" marker
    /// and carries per-datapack counts once the renderer reports them.
    LoadingDatapacks {
        step: Option<DatapackStep>,
    },
    GeneratingChart,
    WaitingForFile,
    Complete {
        cache_key: CacheKey,
        url_path: String,
    },
    Error {
        message: String,
        code: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatapackStep {
    pub current: u32,
    pub total: u32,
    pub name: String,
}

impl ProgressEvent {
    pub fn loading(current: u32, total: u32, name: impl Into<String>) -> Self {
        Self::LoadingDatapacks {
            step: Some(DatapackStep {
                current,
                total,
                name: name.into(),
            }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    pub fn percent(&self) -> u8 {
        match self {
            Self::Initializing | Self::Error { .. } => 0,
            Self::LoadingDatapacks { step: None } => DATAPACK_PHASE_START,
            Self::LoadingDatapacks { step: Some(step) } => step.percent(),
            Self::GeneratingChart => 50,
            Self::WaitingForFile => 90,
            Self::Complete { .. } => 100,
        }
    }

    pub fn stage(&self) -> String {
        match self {
            Self::Initializing => "Initializing".to_string(),
            Self::LoadingDatapacks { step: None } => "Loading Datapacks".to_string(),
            Self::LoadingDatapacks { step: Some(step) } => format!(
                "Loading Datapack: {} ({}/{})",
                step.name, step.current, step.total
            ),
            Self::GeneratingChart => "Generating Chart".to_string(),
            Self::WaitingForFile => "Waiting for File".to_string(),
            Self::Complete { .. } => "Complete".to_string(),
            Self::Error { .. } => "Error".to_string(),
        }
    }

    pub fn to_message(&self) -> ProgressMessage {
        let mut message = ProgressMessage {
            stage: self.stage(),
            percent: self.percent(),
            chartpath: None,
            hash: None,
            error: None,
            error_code: None,
        };
        match self {
            Self::Complete {
                cache_key,
                url_path,
            } => {
                message.chartpath = Some(url_path.clone());
                message.hash = Some(cache_key.to_string());
            }
            Self::Error { message: text, code } => {
                message.error = Some(text.clone());
                message.error_code = Some(*code);
            }
            _ => {}
        }
        message
    }
}

impl DatapackStep {
    /// Linear interpolation across the 10–40% band.
    fn percent(&self) -> u8 {
        if self.total == 0 {
            return DATAPACK_PHASE_START;
        }
        let current = u64::from(self.current.min(self.total));
        let offset = current * DATAPACK_PHASE_SPAN / u64::from(self.total);
        DATAPACK_PHASE_START + offset as u8
    }
}

/// JSON shape delivered to clients over SSE and WebSocket channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMessage {
    pub stage: String,
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chartpath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chart::{ChartRequest, DatapackRef};

    #[test]
    fn datapack_steps_interpolate_between_ten_and_forty() {
        assert_eq!(ProgressEvent::loading(0, 4, "a").percent(), 10);
        assert_eq!(ProgressEvent::loading(1, 2, "a").percent(), 25);
        assert_eq!(ProgressEvent::loading(1, 3, "a").percent(), 20);
        assert_eq!(ProgressEvent::loading(2, 2, "a").percent(), 40);
        assert_eq!(ProgressEvent::loading(9, 2, "a").percent(), 40);
        assert_eq!(ProgressEvent::loading(1, 0, "a").percent(), 10);
    }

    #[test]
    fn complete_message_carries_path_and_hash() {
        let key = CacheKey::for_request(&ChartRequest {
            settings_text: String::new(),
            datapack_refs: vec![DatapackRef::official("GTS", "gts.dpk")],
            use_cache: true,
            is_cross_plot: false,
        });
        let event = ProgressEvent::Complete {
            cache_key: key.clone(),
            url_path: format!("/public/charts/{key}/chart.svg"),
        };

        let json = serde_json::to_value(event.to_message()).expect("serialize");
        assert_eq!(json["stage"], "Complete");
        assert_eq!(json["percent"], 100);
        assert_eq!(json["hash"], key.as_str());
        assert_eq!(
            json["chartpath"],
            format!("/public/charts/{key}/chart.svg").as_str()
        );
        assert!(json.get("errorCode").is_none());
    }

    #[test]
    fn error_message_uses_camel_case_code() {
        let event = ProgressEvent::Error {
            message: "Queue is too busy".to_string(),
            code: 503,
        };
        let json = serde_json::to_value(event.to_message()).expect("serialize");
        assert_eq!(json["stage"], "Error");
        assert_eq!(json["percent"], 0);
        assert_eq!(json["error"], "Queue is too busy");
        assert_eq!(json["errorCode"], 503);
        assert!(event.is_terminal());
    }
}
