//! Configuração do polymath carregada a partir de `polymath.toml`.
//!
//! A struct [`AppConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! Variáveis de ambiente com chaves de API têm precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppResult;

pub const DEFAULT_CONFIG_FILE: &str = "polymath.toml";

/// Configuração de nível superior.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub chains: ChainsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Endereço de escuta do servidor HTTP.
    #[serde(default = "default_bind")]
    pub bind: String,
}

/// Parâmetros do loop de rodadas e dos modos quick/deep.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Horizonte de um job big em segundos (deadline = created_at + horizon).
    #[serde(default = "default_horizon_secs")]
    pub horizon_secs: u64,
    /// Tamanho alvo do lote bruto pedido ao gerador.
    #[serde(default = "default_raw_batch_size")]
    pub raw_batch_size: usize,
    /// Máximo de candidatos aceitos por rodada.
    #[serde(default = "default_round_cap")]
    pub round_cap: usize,
    /// Largura do fan-out concorrente por rodada.
    #[serde(default = "default_fan_out")]
    pub fan_out: usize,
    /// Timeout de cada chamada de provedor, pesquisa ou persistência.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Conceitos desconhecidos aprendidos por um job quick.
    #[serde(default = "default_quick_limit")]
    pub quick_limit: usize,
    /// Conceitos conhecidos aprofundados por um job deep.
    #[serde(default = "default_deepen_limit")]
    pub deepen_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Intervalo de polling dos snapshots em milissegundos.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkersConfig {
    /// Número de workers consumindo a fila de jobs.
    #[serde(default = "default_worker_count")]
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Diretório dos documentos persistidos (jobs e conhecimento).
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub anthropic: ApiProviderConfig,
    #[serde(default)]
    pub groq: ApiProviderConfig,
    #[serde(default)]
    pub gemini: ApiProviderConfig,
    #[serde(default)]
    pub ignis: IgnisConfig,
}

/// Credenciais e modelo de um provedor remoto. Modelo vazio usa o default do adaptador.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IgnisConfig {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResearchConfig {
    #[serde(default)]
    pub google_api_key: String,
    #[serde(default)]
    pub google_cse_id: String,
    /// Desativa a busca no DuckDuckGo.
    #[serde(default)]
    pub disable_duckduckgo: bool,
}

/// Ordem dos provedores para cada ponto de chamada.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainsConfig {
    #[serde(default = "default_generation_chain")]
    pub generation: Vec<String>,
    #[serde(default = "default_synthesis_chain")]
    pub synthesis: Vec<String>,
    #[serde(default = "default_enrichment_chain")]
    pub enrichment: Vec<String>,
    #[serde(default = "default_deepen_chain")]
    pub deepen: Vec<String>,
    #[serde(default = "default_rethink_chain")]
    pub rethink: Vec<String>,
}

fn default_bind() -> String {
    "127.0.0.1:8700".to_string()
}

// Dez minutos, como no protótipo original do job big.
fn default_horizon_secs() -> u64 {
    600
}

fn default_raw_batch_size() -> usize {
    1000
}

fn default_round_cap() -> usize {
    200
}

fn default_fan_out() -> usize {
    5
}

fn default_call_timeout_ms() -> u64 {
    8000
}

fn default_quick_limit() -> usize {
    3
}

fn default_deepen_limit() -> usize {
    5
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_worker_count() -> usize {
    2
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("data")
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn default_generation_chain() -> Vec<String> {
    names(&["groq", "gemini", "anthropic"])
}

fn default_synthesis_chain() -> Vec<String> {
    names(&["groq", "gemini", "ignis", "anthropic"])
}

fn default_enrichment_chain() -> Vec<String> {
    names(&["groq", "gemini", "anthropic"])
}

fn default_deepen_chain() -> Vec<String> {
    names(&["gemini", "groq", "anthropic"])
}

fn default_rethink_chain() -> Vec<String> {
    names(&["gemini", "groq", "ignis", "anthropic"])
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            horizon_secs: default_horizon_secs(),
            raw_batch_size: default_raw_batch_size(),
            round_cap: default_round_cap(),
            fan_out: default_fan_out(),
            call_timeout_ms: default_call_timeout_ms(),
            quick_limit: default_quick_limit(),
            deepen_limit: default_deepen_limit(),
        }
    }
}

impl EngineConfig {
    pub fn horizon(&self) -> Duration {
        Duration::from_secs(self.horizon_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl GatewayConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

impl Default for ChainsConfig {
    fn default() -> Self {
        Self {
            generation: default_generation_chain(),
            synthesis: default_synthesis_chain(),
            enrichment: default_enrichment_chain(),
            deepen: default_deepen_chain(),
            rethink: default_rethink_chain(),
        }
    }
}

impl AppConfig {
    /// Carrega a configuração do caminho dado, ou de `polymath.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<AppConfig>(&contents)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    // Variáveis de ambiente têm precedência sobre o arquivo para chaves e URLs.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |target: &mut String, key: &str| {
            if let Some(value) = lookup(key)
                && !value.is_empty()
            {
                *target = value;
            }
        };
        set(&mut self.providers.anthropic.api_key, "ANTHROPIC_API_KEY");
        set(&mut self.providers.groq.api_key, "GROQ_API_KEY");
        set(&mut self.providers.gemini.api_key, "GEMINI_API_KEY");
        set(&mut self.research.google_api_key, "GOOGLE_API_KEY");
        set(&mut self.research.google_cse_id, "GOOGLE_CSE_ID");

        if let Some(url) = lookup("IGNIS_API_URL")
            && !url.is_empty()
        {
            self.providers.ignis.url = Some(url);
        }
    }

    fn validate(&self) -> AppResult<()> {
        let engine = &self.engine;
        if engine.round_cap == 0 || engine.fan_out == 0 || engine.raw_batch_size == 0 {
            return Err(crate::error::AppError::Config(
                "engine.round_cap, engine.fan_out and engine.raw_batch_size must be positive"
                    .into(),
            ));
        }
        if engine.call_timeout_ms >= engine.horizon_secs.saturating_mul(1000) {
            return Err(crate::error::AppError::Config(
                "engine.call_timeout_ms must be smaller than the job horizon".into(),
            ));
        }
        if self.gateway.poll_interval_ms == 0 {
            return Err(crate::error::AppError::Config(
                "gateway.poll_interval_ms must be positive".into(),
            ));
        }
        if self.workers.count == 0 {
            return Err(crate::error::AppError::Config(
                "workers.count must be positive".into(),
            ));
        }
        Ok(())
    }
}
