use std::collections::HashMap;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::services::oracle::{OracleChain, OracleError, OracleRequest};
use crate::types::Correctness;

const VERDICT_SYSTEM_PROMPT: &str = "You are a strict but fair university examiner. \
For each answer decide whether it is correct, partially-correct or incorrect with respect to \
the question and the reference solution. Reply with JSON only: \
{\"verdicts\":[{\"id\":\"...\",\"verdict\":\"correct|partially-correct|incorrect\",\"feedback\":\"...\"}]}";

#[derive(Debug, Clone)]
pub struct VerdictItem<'a> {
    pub id: &'a str,
    pub question: &'a str,
    pub reference: Option<&'a str>,
    pub answer: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub correctness: Correctness,
    pub feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerdictResponse {
    #[serde(default)]
    verdicts: Vec<VerdictEntry>,
}

#[derive(Debug, Deserialize)]
struct VerdictEntry {
    id: String,
    verdict: String,
    #[serde(default)]
    feedback: Option<String>,
}

pub fn verdict_request(subject: &str, items: &[VerdictItem<'_>]) -> OracleRequest {
    let mut prompt = format!("Subject: {subject}\n\n");
    for item in items {
        prompt.push_str(&format!("## Answer {}\nQuestion: {}\n", item.id, item.question));
        if let Some(reference) = item.reference.filter(|r| !r.trim().is_empty()) {
            prompt.push_str(&format!("Reference solution: {reference}\n"));
        }
        prompt.push_str(&format!("Student answer: {}\n\n", item.answer));
    }

    OracleRequest {
        system: VERDICT_SYSTEM_PROMPT.to_string(),
        prompt,
        schema_name: "verdicts",
        schema: serde_json::json!({
            "type": "object",
            "properties": {
                "verdicts": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "verdict": { "type": "string", "enum": ["correct", "partially-correct", "incorrect"] },
                            "feedback": { "type": "string" }
                        },
                        "required": ["id", "verdict"]
                    }
                }
            },
            "required": ["verdicts"]
        }),
    }
}

/// Asks the oracle to judge every item in one call. Items the oracle skipped
/// or answered with an unknown verdict are absent from the map.
pub async fn request_verdicts(
    oracle: &OracleChain,
    subject: &str,
    items: &[VerdictItem<'_>],
    cancel: &CancellationToken,
) -> Result<HashMap<String, Verdict>, OracleError> {
    if items.is_empty() {
        return Ok(HashMap::new());
    }

    let response: VerdictResponse = oracle
        .generate_as(verdict_request(subject, items), cancel)
        .await?;

    let mut out = HashMap::with_capacity(response.verdicts.len());
    for entry in response.verdicts {
        let Some(correctness) = Correctness::from_verdict(&entry.verdict) else {
            tracing::debug!(id = %entry.id, verdict = %entry.verdict, "unrecognized verdict");
            continue;
        };
        if !items.iter().any(|item| item.id == entry.id) {
            continue;
        }
        out.insert(
            entry.id,
            Verdict {
                correctness,
                feedback: entry.feedback.filter(|f| !f.trim().is_empty()),
            },
        );
    }
    Ok(out)
}
