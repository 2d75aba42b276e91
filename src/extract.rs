use serde_json::Value;

use crate::error::{JobError, Result};
use crate::types::{GeneratedImage, JobHandle};

/// Normalize a COMPLETED job's `output` into a [`GeneratedImage`].
///
/// Recognized shapes:
/// - `"<base64>"`
/// - `{"images": ["<base64>", ...]}`
/// - `{"images": [{"image": "<base64>"}, ...]}`
/// - `{"images": "<base64>"}` or `{"image": "<base64>"}`
/// - a top-level array of any of the above
///
/// The first image wins. Output with no recognizable image is
/// [`JobError::NoImageInOutput`], never an empty result.
pub fn extract(output: &Value, job: &JobHandle) -> Result<GeneratedImage> {
    find_image(output)
        .map(|b64| GeneratedImage {
            base64: b64.to_string(),
            job: job.clone(),
        })
        .ok_or_else(|| JobError::NoImageInOutput {
            job_id: job.job_id.clone(),
        })
}

/// Locate the first base64 image in a job output.
pub fn find_image(output: &Value) -> Option<&str> {
    match output {
        Value::String(s) => non_empty(s),
        Value::Array(items) => items.iter().find_map(find_image),
        Value::Object(obj) => obj
            .get("images")
            .and_then(image_entry)
            .or_else(|| obj.get("image").and_then(|v| v.as_str()).and_then(non_empty)),
        _ => None,
    }
}

fn image_entry(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => non_empty(s),
        Value::Array(items) => items.iter().find_map(image_entry),
        Value::Object(obj) => obj.get("image").and_then(|v| v.as_str()).and_then(non_empty),
        _ => None,
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaVariant;
    use chrono::Utc;
    use serde_json::json;

    fn handle() -> JobHandle {
        JobHandle {
            job_id: "job-9".into(),
            variant: SchemaVariant::EndpointParams,
            seed: 7,
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn test_images_string_array() {
        let img = extract(&json!({"images": ["aaa", "bbb"]}), &handle()).unwrap();
        assert_eq!(img.base64, "aaa");
        assert_eq!(img.job.job_id, "job-9");
    }

    #[test]
    fn test_images_object_array() {
        let img = extract(&json!({"images": [{"image": "ccc", "seed": 1}]}), &handle()).unwrap();
        assert_eq!(img.base64, "ccc");
    }

    #[test]
    fn test_bare_string() {
        let img = extract(&json!("ddd"), &handle()).unwrap();
        assert_eq!(img.base64, "ddd");
    }

    #[test]
    fn test_single_image_key() {
        assert_eq!(find_image(&json!({"image": "eee"})), Some("eee"));
        assert_eq!(find_image(&json!({"images": "fff"})), Some("fff"));
    }

    #[test]
    fn test_top_level_array() {
        assert_eq!(
            find_image(&json!([{"status": "ok"}, {"images": ["ggg"]}])),
            Some("ggg")
        );
    }

    #[test]
    fn test_skips_empty_entries() {
        assert_eq!(find_image(&json!({"images": ["", "hhh"]})), Some("hhh"));
    }

    #[test]
    fn test_no_image_is_an_error() {
        for output in [
            json!({}),
            json!({"images": []}),
            json!({"images": [{"url": "https://x"}]}),
            json!({"message": "done"}),
            json!(""),
            json!(42),
            Value::Null,
        ] {
            let err = extract(&output, &handle()).unwrap_err();
            assert!(
                matches!(err, JobError::NoImageInOutput { ref job_id } if job_id == "job-9"),
                "unexpected result for {}",
                output
            );
        }
    }

    #[test]
    fn test_extract_is_idempotent() {
        let output = json!({"images": [{"image": "iii"}]});
        let job = handle();
        assert_eq!(extract(&output, &job).unwrap(), extract(&output, &job).unwrap());
    }
}
