/// Structured model answers.
///
/// Every result type declares its JSON schema by hand and validates itself
/// after deserialization, so a malformed answer is rejected at the boundary
/// instead of leaking half-parsed values into detection.
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{LocatorError, LocatorResult};
use crate::llm::provider::LlmProvider;
use crate::llm::types::{CallConfig, GenerateRequest, ResponseSchema};

pub trait StructuredResponse: DeserializeOwned + Send + 'static {
    fn schema() -> ResponseSchema;

    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Call the provider and decode its answer as `T`.
pub async fn generate_structured<T: StructuredResponse>(
    provider: &dyn LlmProvider,
    prompt: String,
    image_base64: Option<Arc<str>>,
    call: CallConfig,
) -> LocatorResult<T> {
    let request = GenerateRequest {
        prompt,
        image_base64,
        schema: T::schema(),
        call,
    };
    let name = request.schema.name;
    let raw = provider.generate(request).await?;
    parse_structured::<T>(&raw).map_err(|e| {
        tracing::debug!(schema = name, error = %e, "structured answer rejected");
        e
    })
}

pub fn parse_structured<T: StructuredResponse>(raw: &str) -> LocatorResult<T> {
    let json = extract_json(raw)
        .ok_or_else(|| LocatorError::InvalidResponse(format!("no JSON object in answer: {raw}")))?;
    let value: T = serde_json::from_str(json)
        .map_err(|e| LocatorError::InvalidResponse(format!("{}: {e}", T::schema().name)))?;
    value
        .validate()
        .map_err(|e| LocatorError::InvalidResponse(format!("{}: {e}", T::schema().name)))?;
    Ok(value)
}

/// Pull the JSON object out of a reply that may be wrapped in Markdown fences or prose.
fn extract_json(raw: &str) -> Option<&str> {
    static FENCED: OnceLock<Regex> = OnceLock::new();
    let fenced = FENCED.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(\{.*\})\s*```").expect("static regex")
    });
    if let Some(caps) = fenced.captures(raw) {
        return caps.get(1).map(|m| m.as_str());
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

// ── Grounding ───────────────────────────────────────────────────────────────

/// A box in the model's normalized frame (0..coordinate_scale on both axes).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundingResponse {
    #[serde(default)]
    pub boxes: Vec<NormalizedBox>,
}

impl StructuredResponse for GroundingResponse {
    fn schema() -> ResponseSchema {
        ResponseSchema {
            name: "element_grounding",
            schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "boxes": {
                        "type": "array",
                        "description": "Every visual occurrence of the described element",
                        "items": {
                            "type": "object",
                            "properties": {
                                "x_min": { "type": "number" },
                                "y_min": { "type": "number" },
                                "x_max": { "type": "number" },
                                "y_max": { "type": "number" }
                            },
                            "required": ["x_min", "y_min", "x_max", "y_max"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["boxes"],
                "additionalProperties": false
            }),
        }
    }

    fn validate(&self) -> Result<(), String> {
        for b in &self.boxes {
            let coords = [b.x_min, b.y_min, b.x_max, b.y_max];
            if coords.iter().any(|c| !c.is_finite()) {
                return Err(format!("non-finite coordinate in {b:?}"));
            }
        }
        Ok(())
    }
}

// ── Quorum ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelVote {
    pub label: String,
}

impl StructuredResponse for LabelVote {
    fn schema() -> ResponseSchema {
        ResponseSchema {
            name: "candidate_vote",
            schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "label": {
                        "type": "string",
                        "description": "Label of the single best-matching candidate box"
                    }
                },
                "required": ["label"],
                "additionalProperties": false
            }),
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.label.trim().is_empty() {
            return Err("empty label".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let r: GroundingResponse =
            parse_structured(r#"{"boxes":[{"x_min":1,"y_min":2,"x_max":3,"y_max":4}]}"#).unwrap();
        assert_eq!(r.boxes.len(), 1);
        assert_eq!(r.boxes[0].x_max, 3.0);
    }

    #[test]
    fn test_parse_fenced_json_with_prose() {
        let raw = "Here you go:\n```json\n{\"label\": \"ab\"}\n```\nDone.";
        let v: LabelVote = parse_structured(raw).unwrap();
        assert_eq!(v.label, "ab");
    }

    #[test]
    fn test_missing_boxes_defaults_to_empty() {
        let r: GroundingResponse = parse_structured("{}").unwrap();
        assert!(r.boxes.is_empty());
    }

    #[test]
    fn test_rejects_empty_label() {
        let err = parse_structured::<LabelVote>(r#"{"label": "  "}"#).unwrap_err();
        assert!(matches!(err, LocatorError::InvalidResponse(_)));
    }

    #[test]
    fn test_rejects_non_json() {
        let err = parse_structured::<LabelVote>("I think it is the second one").unwrap_err();
        assert!(matches!(err, LocatorError::InvalidResponse(_)));
    }
}
