//! Configuration loading and validation.
//!
//! Two YAML files under the config root: `main.yaml` for runtime settings
//! and service endpoints, `catalog.yaml` for rooms, add-ons and pricing.
//! String fields support `${VAR}` environment references; unknown variables
//! are left as-is so a missing secret fails loudly at the service boundary
//! rather than silently becoming an empty string.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const MAIN_CONFIG_FILE: &str = "main.yaml";
pub const CATALOG_CONFIG_FILE: &str = "catalog.yaml";

#[derive(Debug, Clone)]
pub struct StayflowConfig {
    pub main: MainConfig,
    pub catalog: CatalogConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MainConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub services: ServicesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub env: String,
    /// Display name of the property, used in guest-facing copy.
    #[serde(default = "default_property")]
    pub property: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            env: default_env(),
            property: default_property(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Cap on concurrently processed messages across all guests.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: i64,
    #[serde(default = "default_sweep_interval_minutes")]
    pub sweep_interval_minutes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_ttl_minutes(),
            sweep_interval_minutes: default_sweep_interval_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            burst: default_burst(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default)]
    pub answers: AnswerServiceConfig,
    #[serde(default)]
    pub payments: PaymentServiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerServiceConfig {
    #[serde(default = "default_answers_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_service_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for AnswerServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_answers_url(),
            api_key: None,
            timeout_seconds: default_service_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentServiceConfig {
    #[serde(default = "default_payments_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_service_timeout")]
    pub timeout_seconds: u64,
}

impl Default for PaymentServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_payments_url(),
            api_key: None,
            timeout_seconds: default_service_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_booking_prefix")]
    pub booking_prefix: String,
    /// Holding deposit charged up front for cash-on-arrival bookings.
    #[serde(default = "default_deposit")]
    pub deposit: i64,
    #[serde(default)]
    pub nights: NightsConfig,
    #[serde(default = "default_rooms")]
    pub rooms: Vec<RoomConfig>,
    #[serde(default)]
    pub addons: AddonsConfig,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            booking_prefix: default_booking_prefix(),
            deposit: default_deposit(),
            nights: NightsConfig::default(),
            rooms: default_rooms(),
            addons: AddonsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    pub name: String,
    /// Nightly rate in whole currency units.
    pub rate: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NightsConfig {
    #[serde(default = "default_nights_min")]
    pub min: u32,
    #[serde(default = "default_nights_max")]
    pub max: u32,
}

impl Default for NightsConfig {
    fn default() -> Self {
        Self {
            min: default_nights_min(),
            max: default_nights_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddonsConfig {
    /// Keyword (as guests type it) to canonical add-on key.
    #[serde(default = "default_aliases")]
    pub aliases: BTreeMap<String, String>,
    /// Canonical key to price in whole currency units.
    #[serde(default = "default_extras")]
    pub extras: BTreeMap<String, i64>,
    /// Canonical keys that are free for guests; never billed.
    #[serde(default = "default_complimentary")]
    pub complimentary: Vec<String>,
}

impl Default for AddonsConfig {
    fn default() -> Self {
        Self {
            aliases: default_aliases(),
            extras: default_extras(),
            complimentary: default_complimentary(),
        }
    }
}

fn default_app_name() -> String {
    "stayflow".to_string()
}

fn default_env() -> String {
    "dev".to_string()
}

fn default_property() -> String {
    "Acacia Ridge Lodge".to_string()
}

fn default_max_concurrent() -> usize {
    32
}

fn default_ttl_minutes() -> i64 {
    60
}

fn default_sweep_interval_minutes() -> u64 {
    5
}

fn default_requests_per_minute() -> u32 {
    30
}

fn default_burst() -> u32 {
    10
}

fn default_answers_url() -> String {
    "http://127.0.0.1:8089".to_string()
}

fn default_payments_url() -> String {
    "http://127.0.0.1:8090".to_string()
}

fn default_service_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_currency() -> String {
    "inr".to_string()
}

fn default_booking_prefix() -> String {
    "STAY".to_string()
}

fn default_deposit() -> i64 {
    2000
}

fn default_nights_min() -> u32 {
    1
}

fn default_nights_max() -> u32 {
    30
}

fn default_rooms() -> Vec<RoomConfig> {
    vec![
        RoomConfig {
            name: "Safari Tent".to_string(),
            rate: 12000,
        },
        RoomConfig {
            name: "Star Bed Suite".to_string(),
            rate: 18000,
        },
        RoomConfig {
            name: "Double Room".to_string(),
            rate: 10000,
        },
        RoomConfig {
            name: "Suite".to_string(),
            rate: 34000,
        },
        RoomConfig {
            name: "Family Room".to_string(),
            rate: 27500,
        },
    ]
}

fn default_aliases() -> BTreeMap<String, String> {
    [
        ("spa", "spa"),
        ("massage", "spa"),
        ("hot air balloon", "hot_air_balloon"),
        ("balloon ride", "hot_air_balloon"),
        ("game drive", "game_drive"),
        ("safari", "game_drive"),
        ("walking safari", "walking_safari"),
        ("bush dinner", "bush_dinner"),
        ("maasai cultural", "maasai_experience"),
        ("maasai experience", "maasai_experience"),
        ("stargazing", "stargazing"),
        ("brownie", "brownie"),
        ("chocolate cake", "chocolate_cake"),
        ("lemonade", "lemonade"),
        ("picnic hamper", "picnic_hamper"),
        ("picnic", "picnic_hamper"),
        ("morning coffee", "morning_coffee"),
        ("yoga", "yoga_session"),
        ("yoga session", "yoga_session"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_extras() -> BTreeMap<String, i64> {
    [
        ("spa", 4500),
        ("hot_air_balloon", 25000),
        ("game_drive", 8000),
        ("walking_safari", 3500),
        ("bush_dinner", 6500),
        ("maasai_experience", 3000),
        ("stargazing", 2500),
        ("brownie", 450),
        ("chocolate_cake", 600),
        ("lemonade", 250),
        ("picnic_hamper", 1800),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn default_complimentary() -> Vec<String> {
    vec!["morning_coffee".to_string(), "yoga_session".to_string()]
}

/// Substitute `${VAR}` references with environment values. Unknown variables
/// and unclosed brackets pass through unchanged.
pub fn resolve_env_var(value: &str) -> String {
    let mut result = String::new();
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(v) => result.push_str(&v),
                    Err(_) => {
                        result.push_str("${");
                        result.push_str(name);
                        result.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}

fn read_yaml_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse config file: {}", path.display()))
}

/// Load and validate both config files from the config root.
pub fn load_config(root: &Path) -> Result<StayflowConfig> {
    let mut main: MainConfig = read_yaml_file(&root.join(MAIN_CONFIG_FILE))?;
    let catalog: CatalogConfig = read_yaml_file(&root.join(CATALOG_CONFIG_FILE))?;

    main.services.answers.base_url = resolve_env_var(&main.services.answers.base_url);
    main.services.payments.base_url = resolve_env_var(&main.services.payments.base_url);
    if let Some(key) = &main.services.answers.api_key {
        main.services.answers.api_key = Some(resolve_env_var(key));
    }
    if let Some(key) = &main.services.payments.api_key {
        main.services.payments.api_key = Some(resolve_env_var(key));
    }

    let config = StayflowConfig { main, catalog };
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &StayflowConfig) -> Result<()> {
    let main = &config.main;
    if main.runtime.max_concurrent == 0 {
        bail!("runtime.max_concurrent must be at least 1");
    }
    if main.session.ttl_minutes < 1 {
        bail!("session.ttl_minutes must be at least 1");
    }
    if main.services.answers.max_attempts == 0 {
        bail!("services.answers.max_attempts must be at least 1");
    }

    let catalog = &config.catalog;
    if catalog.rooms.is_empty() {
        bail!("catalog defines no rooms");
    }
    let mut seen = HashSet::new();
    for room in &catalog.rooms {
        if room.rate <= 0 {
            bail!("room '{}' has a non-positive rate", room.name);
        }
        if !seen.insert(room.name.to_lowercase()) {
            bail!("duplicate room name: {}", room.name);
        }
    }
    if catalog.nights.min < 1 {
        bail!("nights.min must be at least 1");
    }
    if catalog.nights.min > catalog.nights.max {
        bail!(
            "nights.min ({}) exceeds nights.max ({})",
            catalog.nights.min,
            catalog.nights.max
        );
    }
    if catalog.deposit <= 0 {
        bail!("deposit must be positive");
    }
    for (key, price) in &catalog.addons.extras {
        if *price <= 0 {
            bail!("add-on '{}' has a non-positive price", key);
        }
    }
    for (keyword, target) in &catalog.addons.aliases {
        let priced = catalog.addons.extras.contains_key(target);
        let free = catalog.addons.complimentary.iter().any(|c| c == target);
        if !priced && !free {
            bail!("alias '{}' points at unknown add-on '{}'", keyword, target);
        }
    }
    Ok(())
}

/// Write default config files for any that are missing, creating the config
/// root if needed. Existing files are never touched.
pub fn ensure_skeleton_config(root: &Path) -> Result<()> {
    fs::create_dir_all(root)
        .with_context(|| format!("failed to create config root: {}", root.display()))?;

    let main_path = root.join(MAIN_CONFIG_FILE);
    if !main_path.exists() {
        let yaml = serde_yaml::to_string(&MainConfig::default())?;
        fs::write(&main_path, yaml)
            .with_context(|| format!("failed to write {}", main_path.display()))?;
        tracing::info!("wrote default config: {}", main_path.display());
    }

    let catalog_path = root.join(CATALOG_CONFIG_FILE);
    if !catalog_path.exists() {
        let yaml = serde_yaml::to_string(&CatalogConfig::default())?;
        fs::write(&catalog_path, yaml)
            .with_context(|| format!("failed to write {}", catalog_path.display()))?;
        tracing::info!("wrote default config: {}", catalog_path.display());
    }
    Ok(())
}
