//! Configuração do roost carregada a partir de `roost.toml`.
//!
//! A struct [`RoostConfig`] contém todos os parâmetros configuráveis do
//! serviço supervisionado. Valores não presentes no arquivo usam defaults
//! sensíveis. As variáveis de ambiente `PORT` e `ROOST_HOST` têm
//! precedência sobre o arquivo.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::RoostError;

/// Configuração de nível superior carregada de `roost.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct RoostConfig {
    /// Endereço em que o serviço escuta e é sondado.
    #[serde(default = "default_host")]
    pub host: String,

    /// Porta em que o serviço escuta e é sondado.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Executável do serviço filho.
    #[serde(default = "default_command")]
    pub command: String,

    /// Argumentos iniciais do filho; `--host` e `--port` são acrescentados.
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Variáveis de ambiente adicionais passadas ao filho.
    #[serde(default = "default_env")]
    pub env: BTreeMap<String, String>,

    /// Caminho do arquivo de log da saída do serviço.
    #[serde(default = "default_log_file")]
    pub log_file: String,

    /// Intervalo entre sondagens de disponibilidade, em milissegundos.
    #[serde(default = "default_health_interval_ms")]
    pub health_interval_ms: u64,

    /// Tempo máximo de espera pela disponibilidade; ausente = espera indefinida.
    #[serde(default)]
    pub startup_timeout_secs: Option<u64>,

    /// Tempo de espera por término gracioso antes do kill forçado, em segundos.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Número máximo de linhas de saída mantidas em memória.
    #[serde(default = "default_max_console_lines")]
    pub max_console_lines: usize,

    /// Cadência do renderizador de console, em milissegundos.
    #[serde(default = "default_console_interval_ms")]
    pub console_interval_ms: u64,

    /// Rolagem automática para o fim da saída do console.
    #[serde(default = "default_auto_scroll")]
    pub auto_scroll: bool,
}

// Valor padrão para o host: loopback.
fn default_host() -> String {
    "127.0.0.1".to_string()
}

// Valor padrão para a porta: 8080.
fn default_port() -> u16 {
    8080
}

// Valor padrão para o executável do serviço.
fn default_command() -> String {
    "open-webui".to_string()
}

// Valor padrão para os argumentos iniciais.
fn default_args() -> Vec<String> {
    vec!["serve".to_string()]
}

// Ambiente padrão: decodificação UTF-8 forçada nos pipes do filho.
fn default_env() -> BTreeMap<String, String> {
    BTreeMap::from([("PYTHONIOENCODING".to_string(), "utf-8".to_string())])
}

// Valor padrão para o arquivo de log.
fn default_log_file() -> String {
    "open-webui.log".to_string()
}

// Valor padrão para o intervalo de sondagem: 1s.
fn default_health_interval_ms() -> u64 {
    1000
}

// Valor padrão para o timeout de término gracioso: 10s.
fn default_shutdown_timeout_secs() -> u64 {
    10
}

// Valor padrão para o limite de linhas do console: 1000.
fn default_max_console_lines() -> usize {
    1000
}

// Valor padrão para a cadência do console: 500ms.
fn default_console_interval_ms() -> u64 {
    500
}

// Rolagem automática habilitada por padrão.
fn default_auto_scroll() -> bool {
    true
}

impl Default for RoostConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            command: default_command(),
            args: default_args(),
            env: default_env(),
            log_file: default_log_file(),
            health_interval_ms: default_health_interval_ms(),
            startup_timeout_secs: None,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            max_console_lines: default_max_console_lines(),
            console_interval_ms: default_console_interval_ms(),
            auto_scroll: default_auto_scroll(),
        }
    }
}

impl RoostConfig {
    /// Carrega a configuração do caminho fornecido.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: &Path) -> Result<Self, RoostError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<RoostConfig>(&contents)?
        } else {
            Self::default()
        };

        // Variáveis de ambiente têm precedência sobre o arquivo de configuração.
        if let Ok(port) = std::env::var("PORT")
            && let Ok(port) = port.parse::<u16>()
        {
            config.port = port;
        }
        if let Ok(host) = std::env::var("ROOST_HOST")
            && !host.is_empty()
        {
            config.host = host;
        }

        if config.command.trim().is_empty() {
            return Err(RoostError::Config("command must not be empty".to_string()));
        }

        Ok(config)
    }

    /// Intervalo entre sondagens de disponibilidade.
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    /// Orçamento total de espera pela disponibilidade, quando limitado.
    pub fn startup_timeout(&self) -> Option<Duration> {
        self.startup_timeout_secs.map(Duration::from_secs)
    }

    /// Tempo de espera por término gracioso antes do kill forçado.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Cadência do renderizador de console.
    pub fn console_interval(&self) -> Duration {
        Duration::from_millis(self.console_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = RoostConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.command, "open-webui");
        assert_eq!(config.args, vec!["serve"]);
        assert_eq!(config.env.get("PYTHONIOENCODING").unwrap(), "utf-8");
        assert_eq!(config.log_file, "open-webui.log");
        assert_eq!(config.health_interval_ms, 1000);
        assert!(config.startup_timeout_secs.is_none());
        assert_eq!(config.shutdown_timeout_secs, 10);
        assert_eq!(config.max_console_lines, 1000);
        assert_eq!(config.console_interval_ms, 500);
        assert!(config.auto_scroll);
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            port = 3000
            command = "webapp"
            args = []
            startup_timeout_secs = 60
        "#;
        let config: RoostConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.command, "webapp");
        assert!(config.args.is_empty());
        assert_eq!(config.startup_timeout_secs, Some(60));
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.shutdown_timeout_secs, 10);
    }

    #[test]
    fn duration_helpers() {
        let config = RoostConfig {
            health_interval_ms: 250,
            startup_timeout_secs: Some(30),
            shutdown_timeout_secs: 5,
            console_interval_ms: 100,
            ..RoostConfig::default()
        };
        assert_eq!(config.health_interval(), Duration::from_millis(250));
        assert_eq!(config.startup_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
        assert_eq!(config.console_interval(), Duration::from_millis(100));
    }

    #[test]
    fn empty_command_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roost.toml");
        std::fs::write(&path, "command = \"  \"").unwrap();
        let result = RoostConfig::load(&path);
        assert!(matches!(result, Err(RoostError::Config(_))));
    }

    #[test]
    fn env_port_has_precedence() {
        // Other config tests do not assert on `port`, so the temporary
        // environment override cannot race them.
        unsafe { std::env::set_var("PORT", "9191") };
        let dir = tempfile::tempdir().unwrap();
        let config = RoostConfig::load(&dir.path().join("missing.toml"));
        unsafe { std::env::remove_var("PORT") };
        assert_eq!(config.unwrap().port, 9191);
    }

    #[test]
    fn load_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RoostConfig::load(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.command, "open-webui");
        assert_eq!(config.max_console_lines, 1000);
    }
}
