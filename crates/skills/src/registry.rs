use rusty_dialogue_common::{
    ActionConfig, AssistantError, Classification, DomainManifest, Result, SkillConfig, SkillManifest,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

const DOMAIN_MANIFEST: &str = "domain.json";
const SKILL_MANIFEST: &str = "skill.json";
const CONFIG_DIR: &str = "config";

#[derive(Debug, Clone)]
pub struct SkillEntry {
    pub domain: String,
    pub name: String,
    pub dir: PathBuf,
    pub manifest: SkillManifest,
    /// Per-language configuration, keyed by language code.
    pub configs: BTreeMap<String, SkillConfig>,
}

impl SkillEntry {
    pub fn config(&self, lang: &str) -> Result<&SkillConfig> {
        self.configs.get(lang).ok_or_else(|| {
            AssistantError::NotFound(format!(
                "Configuration of skill {}.{} for language {}",
                self.domain, self.name, lang
            ))
        })
    }
}

#[derive(Debug, Clone)]
pub struct DomainEntry {
    pub manifest: DomainManifest,
    pub skills: BTreeMap<String, SkillEntry>,
}

/// Domains, skills and their action configurations, read once from the
/// skills directory (`<domain>/domain.json`, `<domain>/<skill>/skill.json`,
/// `<domain>/<skill>/config/<lang>.json`).
#[derive(Debug, Clone, Default)]
pub struct SkillRegistry {
    root: PathBuf,
    domains: BTreeMap<String, DomainEntry>,
}

impl SkillRegistry {
    pub async fn load(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        info!("Loading skills from: {:?}", root);

        if !root.exists() {
            warn!("Skills directory does not exist: {:?}", root);
            return Ok(Self {
                root,
                domains: BTreeMap::new(),
            });
        }

        let mut domains = BTreeMap::new();
        let mut entries = fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(domain_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };

            match load_domain(&domain_name, &path).await {
                Ok(Some(domain)) => {
                    debug!("Loaded domain {} with {} skill(s)", domain_name, domain.skills.len());
                    domains.insert(domain_name, domain);
                }
                Ok(None) => debug!("Skipping {:?}: no {}", path, DOMAIN_MANIFEST),
                Err(e) => warn!("Failed to load domain {:?}: {}", path, e),
            }
        }

        let registry = Self { root, domains };
        info!(
            "Loaded {} domain(s), {} skill(s)",
            registry.domains.len(),
            registry.skills().count()
        );
        Ok(registry)
    }

    pub fn from_entries(root: impl Into<PathBuf>, skills: Vec<SkillEntry>) -> Self {
        let mut domains: BTreeMap<String, DomainEntry> = BTreeMap::new();
        for skill in skills {
            domains
                .entry(skill.domain.clone())
                .or_insert_with(|| DomainEntry {
                    manifest: DomainManifest {
                        name: skill.domain.clone(),
                    },
                    skills: BTreeMap::new(),
                })
                .skills
                .insert(skill.name.clone(), skill);
        }
        Self {
            root: root.into(),
            domains,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn domains(&self) -> impl Iterator<Item = (&String, &DomainEntry)> {
        self.domains.iter()
    }

    pub fn skills(&self) -> impl Iterator<Item = &SkillEntry> {
        self.domains.values().flat_map(|domain| domain.skills.values())
    }

    pub fn skill(&self, domain: &str, skill: &str) -> Result<&SkillEntry> {
        self.domains
            .get(domain)
            .and_then(|d| d.skills.get(skill))
            .ok_or_else(|| AssistantError::NotFound(format!("Skill {}.{}", domain, skill)))
    }

    pub fn skill_config(&self, domain: &str, skill: &str, lang: &str) -> Result<&SkillConfig> {
        self.skill(domain, skill)?.config(lang)
    }

    pub fn action_config(&self, classification: &Classification, lang: &str) -> Result<&ActionConfig> {
        self.skill_config(&classification.domain, &classification.skill, lang)?
            .actions
            .get(&classification.action)
            .ok_or_else(|| AssistantError::NotFound(format!("Action {}", classification.label())))
    }

    /// True when `domain.skill.action` names a declared action in any language.
    pub fn action_exists(&self, label: &str) -> bool {
        let Some(classification) = Classification::from_label(label, 0.0) else {
            return false;
        };
        self.skill(&classification.domain, &classification.skill)
            .map(|skill| {
                skill
                    .configs
                    .values()
                    .any(|config| config.actions.contains_key(&classification.action))
            })
            .unwrap_or(false)
    }

    /// Listing of every action and its samples for the action recognition duty.
    pub fn actions_classifier_content(&self, lang: &str) -> String {
        let mut lines = Vec::new();
        for skill in self.skills() {
            let Ok(config) = skill.config(lang) else {
                continue;
            };
            for (action, action_config) in &config.actions {
                let label = format!("{}.{}.{}", skill.domain, skill.name, action);
                if action_config.utterance_samples.is_empty() {
                    lines.push(format!("- {}", label));
                } else {
                    lines.push(format!(
                        "- {}: {}",
                        label,
                        action_config.utterance_samples.join(" | ")
                    ));
                }
            }
        }
        lines.join("\n")
    }
}

async fn load_domain(name: &str, dir: &Path) -> Result<Option<DomainEntry>> {
    let manifest_path = dir.join(DOMAIN_MANIFEST);
    if !manifest_path.exists() {
        return Ok(None);
    }
    let manifest: DomainManifest = read_json(&manifest_path).await?;

    let mut skills = BTreeMap::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.join(SKILL_MANIFEST).exists() {
            continue;
        }
        let Some(skill_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };

        match load_skill(name, &skill_name, &path).await {
            Ok(skill) => {
                skills.insert(skill_name, skill);
            }
            Err(e) => warn!("Failed to load skill {}.{}: {}", name, skill_name, e),
        }
    }

    Ok(Some(DomainEntry { manifest, skills }))
}

async fn load_skill(domain: &str, name: &str, dir: &Path) -> Result<SkillEntry> {
    let manifest: SkillManifest = read_json(&dir.join(SKILL_MANIFEST)).await?;

    let mut configs = BTreeMap::new();
    let config_dir = dir.join(CONFIG_DIR);
    if config_dir.is_dir() {
        let mut entries = fs::read_dir(&config_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(lang) = path.file_stem().and_then(|s| s.to_str()) {
                configs.insert(lang.to_string(), read_json(&path).await?);
            }
        }
    }

    Ok(SkillEntry {
        domain: domain.to_string(),
        name: name.to_string(),
        dir: dir.to_path_buf(),
        manifest,
        configs,
    })
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).await?;
    serde_json::from_str(&content)
        .map_err(|e| AssistantError::Configuration(format!("{}: {}", path.display(), e)))
}
