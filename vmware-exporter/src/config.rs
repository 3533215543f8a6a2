/**
 * CONFIGURATION - Chargement de exporter.yaml + surcharges d'environnement
 *
 * RÔLE : Lit le fichier YAML désigné par VMWARE_EXPORTER_CONFIG (défaut
 * exporter.yaml), puis applique les variables d'environnement VSPHERE_* et
 * VMWARE_EXPORTER_*. Chargée une fois au démarrage, jamais rechargée.
 *
 * FONCTIONNEMENT : fichier absent, vide ou invalide => valeurs par défaut
 * avec un warning, l'environnement suffit alors à configurer l'exporter.
 */

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ExporterConfig {
    pub vsphere: VsphereConf,
    pub metrics: MetricsConf,
    pub polling: PollingConf,
    /// Inventaire JSON servi à la place de vCenter (mode hors ligne)
    pub fixture: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct VsphereConf {
    pub hostname: String,
    pub username: String,
    pub password: String,
    pub insecure: bool,
    pub release: String, // ex: "8.0.1.0", segment de /sdk/vim25/{release}
    pub request_timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MetricsConf {
    pub listen_port: u16,
    pub evict_stale_series: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PollingConf {
    pub interval_secs: u64,
}

impl Default for VsphereConf {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            username: String::new(),
            password: String::new(),
            insecure: false,
            release: "8.0.1.0".into(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for MetricsConf {
    fn default() -> Self {
        Self {
            listen_port: 8080,
            evict_stale_series: false,
        }
    }
}

impl Default for PollingConf {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

impl VsphereConf {
    /// Vérifie ce dont la connexion a besoin, avant tout appel réseau.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hostname.trim().is_empty() {
            return Err(ConfigError::Missing("vsphere.hostname (VSPHERE_HOSTNAME)"));
        }
        if self.username.is_empty() {
            return Err(ConfigError::Missing("vsphere.username (VSPHERE_USERNAME)"));
        }
        if self.hostname.contains('/') {
            return Err(ConfigError::Invalid {
                key: "vsphere.hostname",
                reason: format!("expected host[:port], got {:?}", self.hostname),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "vsphere.request_timeout_secs",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

impl ExporterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polling.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "polling.interval_secs",
                reason: "must be at least 1".into(),
            });
        }
        // en mode fixture, vCenter n'est jamais contacté
        if self.fixture.is_none() {
            self.vsphere.validate()?;
        }
        Ok(())
    }

    /// Applique les surcharges d'environnement. `lookup` isole la lecture
    /// de l'environnement pour les tests.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("VSPHERE_HOSTNAME") {
            self.vsphere.hostname = v;
        }
        if let Some(v) = lookup("VSPHERE_USERNAME") {
            self.vsphere.username = v;
        }
        if let Some(v) = lookup("VSPHERE_PASSWORD") {
            self.vsphere.password = v;
        }
        if let Some(v) = lookup("VSPHERE_INSECURE") {
            self.vsphere.insecure = v.eq_ignore_ascii_case("true");
        }
        if let Some(v) = lookup("VMWARE_EXPORTER_PORT") {
            self.metrics.listen_port = v.parse().map_err(|e| ConfigError::Invalid {
                key: "VMWARE_EXPORTER_PORT",
                reason: format!("{e}"),
            })?;
        }
        if let Some(v) = lookup("VMWARE_EXPORTER_INTERVAL_SECS") {
            self.polling.interval_secs = v.parse().map_err(|e| ConfigError::Invalid {
                key: "VMWARE_EXPORTER_INTERVAL_SECS",
                reason: format!("{e}"),
            })?;
        }
        if let Some(v) = lookup("VMWARE_EXPORTER_FIXTURE") {
            self.fixture = Some(PathBuf::from(v));
        }
        Ok(())
    }
}

/// Lit le YAML sans jamais échouer : toute erreur donne les valeurs par défaut.
pub async fn read_config_file(path: &Path) -> ExporterConfig {
    if !path.exists() {
        warn!("No {} found, using default configuration", path.display());
        return ExporterConfig::default();
    }
    let txt = match fs::read_to_string(path).await {
        Ok(txt) => txt,
        Err(e) => {
            warn!("Cannot read {}: {}, using default configuration", path.display(), e);
            return ExporterConfig::default();
        }
    };
    if txt.trim().is_empty() {
        return ExporterConfig::default();
    }
    serde_yaml::from_str(&txt).unwrap_or_else(|e| {
        warn!("Invalid configuration {}: {}", path.display(), e);
        ExporterConfig::default()
    })
}

pub async fn load_config() -> Result<ExporterConfig, ConfigError> {
    let path = std::env::var("VMWARE_EXPORTER_CONFIG").unwrap_or_else(|_| "exporter.yaml".into());
    let mut cfg = read_config_file(Path::new(&path)).await;
    cfg.apply_env(|key| std::env::var(key).ok())?;
    cfg.validate()?;
    info!(
        "Configuration loaded (port {}, interval {}s, source {})",
        cfg.metrics.listen_port,
        cfg.polling.interval_secs,
        match &cfg.fixture {
            Some(p) => p.display().to_string(),
            None => cfg.vsphere.hostname.clone(),
        }
    );
    Ok(cfg)
}
