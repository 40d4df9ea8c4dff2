use chrono::{NaiveDate, NaiveTime, Weekday};
use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::policy::{CancellationPolicy, OperatingHours, StudioPolicy};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    pub debug: bool,
    pub auth_token: String,
    pub enable_swagger: bool,
    pub port: u16,
    pub studio_name: String,
    /// IANA zone the studio's wall clock runs in.
    pub timezone: String,
    /// JSON files are kept here; memory only when unset.
    pub data_dir: Option<String>,
    pub seed_file: Option<String>,
    pub max_write_attempts: u32,
    pub policy: PolicySettings,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicySettings {
    pub cancellation_notice_hours: u32,
    /// 0 disables the limit.
    pub max_bookings_per_user: u32,
    pub open_days: Vec<String>,
    pub opening_time: String,
    pub closing_time: String,
    pub holidays: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            auth_token: "default-token-change-me".to_string(),
            enable_swagger: true,
            port: 8080,
            studio_name: "Pilates Studio".to_string(),
            timezone: "Europe/Madrid".to_string(),
            data_dir: None,
            seed_file: None,
            max_write_attempts: 8,
            policy: PolicySettings::default(),
        }
    }
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            cancellation_notice_hours: 24,
            max_bookings_per_user: 10,
            open_days: ["mon", "tue", "wed", "thu", "fri"].map(String::from).to_vec(),
            opening_time: "07:00".to_string(),
            closing_time: "20:00".to_string(),
            holidays: Vec::new(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let config = Config::builder()
            .set_default("debug", false)?
            .set_default("auth_token", "default-token-change-me")?
            .set_default("enable_swagger", true)?
            .set_default("port", 8080)?
            .set_default("studio_name", "Pilates Studio")?
            .set_default("timezone", "Europe/Madrid")?
            .set_default("max_write_attempts", 8)?
            .set_default("policy.cancellation_notice_hours", 24)?
            .set_default("policy.max_bookings_per_user", 10)?
            .set_default("policy.open_days", vec!["mon", "tue", "wed", "thu", "fri"])?
            .set_default("policy.opening_time", "07:00")?
            .set_default("policy.closing_time", "20:00")?
            .set_default("policy.holidays", Vec::<String>::new())?
            .add_source(File::with_name("studio").required(false))
            // APP_AUTH_TOKEN, APP_POLICY__OPEN_DAYS=mon,wed,fri, ...
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("policy.open_days")
                    .with_list_parse_key("policy.holidays")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|err| ConfigError::Message(format!("invalid timezone {}: {err}", self.timezone)))
    }

    pub fn studio_policy(&self) -> Result<StudioPolicy, ConfigError> {
        self.policy.to_policy()
    }
}

impl PolicySettings {
    pub fn to_policy(&self) -> Result<StudioPolicy, ConfigError> {
        let open_days = self
            .open_days
            .iter()
            .map(|day| {
                day.trim()
                    .parse::<Weekday>()
                    .map_err(|_| ConfigError::Message(format!("invalid weekday: {day}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let holidays = self
            .holidays
            .iter()
            .map(|day| {
                NaiveDate::parse_from_str(day.trim(), "%Y-%m-%d")
                    .map_err(|_| ConfigError::Message(format!("invalid holiday date: {day}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let opens = parse_time(&self.opening_time)?;
        let closes = parse_time(&self.closing_time)?;
        if closes <= opens {
            return Err(ConfigError::Message(format!(
                "closing time {} must be after opening time {}",
                self.closing_time, self.opening_time
            )));
        }

        Ok(StudioPolicy {
            cancellation: CancellationPolicy::new(self.cancellation_notice_hours),
            hours: OperatingHours {
                open_days,
                opens,
                closes,
                holidays,
            },
            max_bookings_per_user: (self.max_bookings_per_user > 0)
                .then_some(self.max_bookings_per_user),
        })
    }
}

fn parse_time(value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| ConfigError::Message(format!("invalid time of day (HH:MM): {value}")))
}
