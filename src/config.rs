//! 应用配置：从 config/default.toml 与环境变量加载；Agent 名册从 prompts.toml 加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `THEATRE__*` 覆盖（双下划线表示嵌套，如 `THEATRE__LLM__PROVIDER=ollama`）。
//! 名册在此处一次性解析为规范的 AgentIdentity 列表，调用方不再做任何回退。

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::core::{AgentIdentity, SynthesiserIdentity};
use crate::llm::GenerationParams;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub embedding: EmbeddingSection,
    pub memory: MemorySection,
}

/// [app] 段：数据库、名册路径、工作记忆轮数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub database_path: PathBuf,
    pub prompts_path: PathBuf,
    /// 工作记忆保留的 (user, assistant) 对数 H
    pub history_pairs: usize,
    /// 每个 Agent 每轮检索的情景记忆条数，上限 3
    pub retrieve_k: usize,
    /// 进程内最多缓存的工作记忆窗口数，超出按最久未使用淘汰
    pub working_memory_windows: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/mind-theatre.db"),
            prompts_path: PathBuf::from("config/prompts.toml"),
            history_pairs: 3,
            retrieve_k: 3,
            working_memory_windows: 1024,
        }
    }
}

/// [llm] 段：后端选择、各后端默认模型、超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / ollama
    pub provider: String,
    pub base_url: Option<String>,
    pub openai: LlmOpenAiSection,
    pub ollama: LlmOllamaSection,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: None,
            openai: LlmOpenAiSection::default(),
            ollama: LlmOllamaSection::default(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmOpenAiSection {
    pub model: String,
    pub synth_model: String,
}

impl Default for LlmOpenAiSection {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            synth_model: "gpt-4o-mini".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmOllamaSection {
    pub base_url: String,
    pub model: String,
    pub synth_model: String,
}

impl Default for LlmOllamaSection {
    fn default() -> Self {
        Self {
            base_url: crate::llm::OLLAMA_DEFAULT_BASE_URL.to_string(),
            model: "llama3:latest".to_string(),
            synth_model: "llama3:latest".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次补全 / 嵌入调用超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

impl LlmSection {
    pub fn is_ollama(&self) -> bool {
        self.provider.eq_ignore_ascii_case("ollama")
    }

    /// 当前后端的 Agent 默认模型
    pub fn agent_model(&self) -> &str {
        if self.is_ollama() {
            &self.ollama.model
        } else {
            &self.openai.model
        }
    }

    /// 当前后端的合成默认模型
    pub fn synth_model(&self) -> &str {
        if self.is_ollama() {
            &self.ollama.synth_model
        } else {
            &self.openai.synth_model
        }
    }
}

/// [embedding] 段：未设置时按后端取默认模型与维度
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EmbeddingSection {
    pub model: Option<String>,
    pub dimension: Option<usize>,
}

impl EmbeddingSection {
    pub fn model_for(&self, llm: &LlmSection) -> String {
        self.model.clone().unwrap_or_else(|| {
            if llm.is_ollama() {
                "nomic-embed-text:latest".to_string()
            } else {
                "text-embedding-ada-002".to_string()
            }
        })
    }

    /// 嵌入维度 D
    pub fn dimension_for(&self, llm: &LlmSection) -> usize {
        self.dimension
            .unwrap_or(if llm.is_ollama() { 768 } else { 1536 })
    }
}

/// [memory] 段：近似最近邻索引参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// 单个 Agent 的记忆条数不超过此值时直接精确扫描
    pub exact_scan_limit: usize,
    pub lsh_tables: usize,
    pub lsh_bits: usize,
    pub seed: u64,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            exact_scan_limit: 512,
            lsh_tables: 8,
            lsh_bits: 12,
            seed: 0x5eed_0f_7ea7e,
        }
    }
}

/// 从 config 目录加载配置，环境变量 THEATRE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 THEATRE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("THEATRE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

/// 名册加载错误
#[derive(Error, Debug)]
pub enum RosterError {
    #[error("failed to read roster {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid roster TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("agent with empty name in roster")]
    EmptyName,

    #[error("duplicate agent name: {0}")]
    DuplicateAgent(String),

    #[error("synthesiser_prompt is missing or empty")]
    MissingSynthesiserPrompt,
}

/// 解析后的名册：有序 Agent 列表 + 合成者
#[derive(Debug, Clone)]
pub struct Roster {
    pub agents: Vec<AgentIdentity>,
    pub synthesiser: SynthesiserIdentity,
}

impl Roster {
    pub fn agent_names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name.clone()).collect()
    }

    pub fn find(&self, name: &str) -> Option<&AgentIdentity> {
        self.agents.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Deserialize)]
struct RosterToml {
    #[serde(default)]
    synthesiser_prompt: String,
    #[serde(default)]
    synthesiser_params: GenerationParams,
    #[serde(default)]
    agents: Vec<AgentToml>,
}

#[derive(Debug, Deserialize)]
struct AgentToml {
    name: String,
    prompt: String,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    llm_params: GenerationParams,
}

/// 按名字取默认颜色（名册未指定 color 时）
fn palette_color(name: &str) -> &'static str {
    match name {
        "Id" => "red",
        "Eros (Life Drive)" => "deepPink",
        "Thanatos (Death Drive)" => "darkSlateBlue",
        "Ego" => "green",
        "Superego" => "blue",
        "Defence Manager" => "darkGoldenRod",
        "Conscience" => "orange",
        "Ego-Ideal" => "purple",
        "Imaginary Register" => "teal",
        "Symbolic Register" => "saddleBrown",
        "Real Register" => "gray",
        "objet petit a" => "olive",
        "Sinthome" => "maroon",
        crate::core::PSYCHE_NAME => crate::core::PSYCHE_COLOR,
        _ => "grey",
    }
}

/// 从 TOML 文本解析名册；agent 模型缺省时填入 default_model，合成模型缺省时填入 synth_model
pub fn parse_roster(
    text: &str,
    default_model: &str,
    synth_model: &str,
) -> Result<Roster, RosterError> {
    let raw: RosterToml = toml::from_str(text)?;

    if raw.synthesiser_prompt.trim().is_empty() {
        return Err(RosterError::MissingSynthesiserPrompt);
    }

    let mut seen = HashSet::new();
    let mut agents = Vec::with_capacity(raw.agents.len());
    for a in raw.agents {
        let name = a.name.trim().to_string();
        if name.is_empty() {
            return Err(RosterError::EmptyName);
        }
        if !seen.insert(name.clone()) {
            return Err(RosterError::DuplicateAgent(name));
        }
        let mut params = a.llm_params;
        if params.model.is_none() {
            params.model = Some(default_model.to_string());
        }
        let color = a
            .color
            .unwrap_or_else(|| palette_color(&name).to_string());
        agents.push(AgentIdentity {
            name,
            system_prompt: a.prompt,
            params,
            color,
        });
    }

    let mut synth_params = raw.synthesiser_params;
    if synth_params.model.is_none() {
        synth_params.model = Some(synth_model.to_string());
    }

    Ok(Roster {
        agents,
        synthesiser: SynthesiserIdentity {
            prompt: raw.synthesiser_prompt,
            params: synth_params,
        },
    })
}

/// 内置名册：Id / Ego / Superego
pub fn default_roster(default_model: &str, synth_model: &str) -> Roster {
    let agent = |name: &str, prompt: &str, temperature: f32, max_tokens: u32| AgentIdentity {
        name: name.to_string(),
        system_prompt: prompt.to_string(),
        params: GenerationParams::with_model(default_model)
            .temperature(temperature)
            .max_tokens(max_tokens),
        color: palette_color(name).to_string(),
    };
    Roster {
        agents: vec![
            agent(
                "Id",
                "You are the Id. Respond with primal urges and immediate desires. Be demanding and emotional.",
                0.8,
                100,
            ),
            agent(
                "Ego",
                "You are the Ego. Mediate between the Id and Superego. Be rational, pragmatic, and reality-oriented.",
                0.5,
                150,
            ),
            agent(
                "Superego",
                "You are the Superego. Represent the internalized ideals and moral conscience. Be judgmental and strive for perfection.",
                0.6,
                120,
            ),
        ],
        synthesiser: SynthesiserIdentity {
            prompt: "You are the Psyche, the single conscious voice that speaks after listening to the inner voices. \
                     Answer the user directly in the first person, as one integrated self. \
                     Do not list the voices, do not name them, and do not use bullet points."
                .to_string(),
            params: GenerationParams::with_model(synth_model).temperature(0.7),
        },
    }
}

/// 加载名册：文件不存在时用内置名册，存在但非法时报错
pub fn load_roster(path: &Path, llm: &LlmSection) -> Result<Roster, RosterError> {
    if !path.exists() {
        tracing::warn!("Roster {:?} not found, using built-in agents", path);
        return Ok(default_roster(llm.agent_model(), llm.synth_model()));
    }
    let text = std::fs::read_to_string(path).map_err(|source| RosterError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let roster = parse_roster(&text, llm.agent_model(), llm.synth_model())?;
    tracing::info!("Loaded {} agents from {:?}", roster.agents.len(), path);
    Ok(roster)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROSTER: &str = r#"
synthesiser_prompt = "Speak as one."

[synthesiser_params]
temperature = 0.3

[[agents]]
name = "Id"
prompt = "You want things."

[[agents]]
name = "Critic"
prompt = "You judge."
color = "black"

[agents.llm_params]
model = "gpt-4o"
max_tokens = 80
"#;

    #[test]
    fn test_parse_roster_resolves_defaults_once() {
        let roster = parse_roster(ROSTER, "agent-model", "synth-model").unwrap();
        assert_eq!(roster.agent_names(), vec!["Id", "Critic"]);

        let id = roster.find("Id").unwrap();
        assert_eq!(id.color, "red");
        assert_eq!(id.params.model.as_deref(), Some("agent-model"));

        let critic = roster.find("Critic").unwrap();
        assert_eq!(critic.color, "black");
        assert_eq!(critic.params.model.as_deref(), Some("gpt-4o"));
        assert_eq!(critic.params.max_tokens, Some(80));

        assert_eq!(roster.synthesiser.params.model.as_deref(), Some("synth-model"));
        assert_eq!(roster.synthesiser.params.temperature, Some(0.3));
    }

    #[test]
    fn test_parse_roster_rejects_duplicates() {
        let text = r#"
synthesiser_prompt = "x"
[[agents]]
name = "Ego"
prompt = "a"
[[agents]]
name = "Ego"
prompt = "b"
"#;
        assert!(matches!(
            parse_roster(text, "m", "s"),
            Err(RosterError::DuplicateAgent(n)) if n == "Ego"
        ));
    }

    #[test]
    fn test_parse_roster_requires_synthesiser_prompt() {
        let text = "[[agents]]\nname = \"Ego\"\nprompt = \"a\"\n";
        assert!(matches!(
            parse_roster(text, "m", "s"),
            Err(RosterError::MissingSynthesiserPrompt)
        ));
    }

    #[test]
    fn test_embedding_defaults_follow_provider() {
        let mut llm = LlmSection::default();
        let emb = EmbeddingSection::default();
        assert_eq!(emb.dimension_for(&llm), 1536);
        llm.provider = "Ollama".into();
        assert_eq!(emb.dimension_for(&llm), 768);
        assert_eq!(llm.agent_model(), "llama3:latest");
    }

    #[test]
    fn test_default_config_sections() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.history_pairs, 3);
        assert_eq!(cfg.app.retrieve_k, 3);
        assert_eq!(cfg.app.working_memory_windows, 1024);
        assert_eq!(cfg.llm.timeouts.request, 60);
        assert!(cfg.memory.lsh_bits > 0);
    }
}
