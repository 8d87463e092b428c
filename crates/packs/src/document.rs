//! Wire format of the versioned pack document.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use omnia_domain::error::{Error, Result};
use omnia_domain::evals::{eval_type, EvalDefinition, EvalTrigger, PackAssertion, PromptPackEvals};

/// The `pack.json` document as authored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackDocument {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub evals: Vec<EvalDefinition>,
    #[serde(default)]
    pub pack_assertions: Vec<PackAssertion>,
}

impl PackDocument {
    /// Parse a raw `pack.json` body.
    pub fn parse(key: &str, raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::pack(key, format!("invalid pack.json: {e}")))
    }

    /// Flatten into the cached form: explicit evals first, converted
    /// assertions after.
    pub fn into_evals(self, pack_name: &str) -> PromptPackEvals {
        let mut evals = self.evals;
        evals.extend(
            self.pack_assertions
                .into_iter()
                .enumerate()
                .map(|(i, a)| convert_assertion(i, a)),
        );
        PromptPackEvals {
            pack_name: pack_name.to_owned(),
            pack_version: self.version,
            evals,
        }
    }
}

/// Convert a declarative pack assertion into an `arena_assertion` eval.
///
/// Synthetic ids are positional (`pack-assertion-0`, `pack-assertion-1`, …)
/// and the trigger is always `on_session_complete`.
pub fn convert_assertion(index: usize, assertion: PackAssertion) -> EvalDefinition {
    let description = assertion
        .message
        .unwrap_or_else(|| format!("arena assertion: {}", assertion.assertion_type));

    let mut params = Map::new();
    params.insert("assertion_type".into(), Value::String(assertion.assertion_type));
    params.insert("assertion_params".into(), Value::Object(assertion.params));

    EvalDefinition {
        id: format!("pack-assertion-{index}"),
        eval_type: eval_type::ARENA_ASSERTION.into(),
        trigger: EvalTrigger::OnSessionComplete,
        description,
        params,
        judge_name: None,
    }
}
