use crate::navigation::types::{NavigationState, Transition};
use crate::session::types::SessionId;
use crate::workflow::WorkflowStep;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use url::Url;

/// Encode a workflow position into a restorable location string:
/// `{base}/{sessionId}[/{substep}]?sessionId=…&step=…[&substep=…][&state=<base64 JSON>]&timestamp=<epoch ms>`.
///
/// Round-trips losslessly through [`decode_location`] for every supplied
/// field; only the timestamp reflects encode time.
pub fn encode_location(
    base: &Url,
    session_id: SessionId,
    step: WorkflowStep,
    substep: Option<&str>,
    parameters: Option<&serde_json::Map<String, serde_json::Value>>,
) -> String {
    let mut url = base.clone();

    {
        // Path segments are always appendable on the http(s) bases we accept.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&session_id.to_string());
            if let Some(substep) = substep {
                segments.push(substep);
            }
        }
    }

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("sessionId", &session_id.to_string());
        query.append_pair("step", step.slug());
        if let Some(substep) = substep {
            query.append_pair("substep", substep);
        }
        if let Some(parameters) = parameters {
            let blob = serde_json::Value::Object(parameters.clone()).to_string();
            query.append_pair("state", &STANDARD.encode(blob.as_bytes()));
        }
        query.append_pair("timestamp", &Utc::now().timestamp_millis().to_string());
    }

    url.to_string()
}

/// Decode a location string back into a [`NavigationState`].
///
/// Malformed input or missing required fields yield `None`, never an error.
pub fn decode_location(location: &str) -> Option<NavigationState> {
    let url = Url::parse(location).ok()?;

    let mut session_id = None;
    let mut step = None;
    let mut substep = None;
    let mut parameters = None;
    let mut timestamp = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "sessionId" => session_id = value.parse::<SessionId>().ok(),
            "step" => step = WorkflowStep::from_slug(&value),
            "substep" => substep = Some(value.into_owned()),
            "state" => {
                let bytes = STANDARD.decode(value.as_bytes()).ok()?;
                match serde_json::from_slice::<serde_json::Value>(&bytes).ok()? {
                    serde_json::Value::Object(map) => parameters = Some(map),
                    _ => return None,
                }
            }
            "timestamp" => {
                let millis = value.parse::<i64>().ok()?;
                timestamp = DateTime::<Utc>::from_timestamp_millis(millis);
            }
            _ => {}
        }
    }

    Some(NavigationState {
        session_id: session_id?,
        step: step?,
        substep,
        parameters,
        timestamp: timestamp?,
        url: location.to_string(),
        transition: Transition::Push,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn base() -> Url {
        Url::parse("https://app.cvflow.example/enhance").unwrap()
    }

    #[test]
    fn test_round_trip_all_fields() {
        let session_id = Uuid::new_v4();
        let mut params = serde_json::Map::new();
        params.insert("template".to_string(), json!("modern"));
        params.insert("page".to_string(), json!(2));

        let encoded = encode_location(
            &base(),
            session_id,
            WorkflowStep::Preview,
            Some("layout"),
            Some(&params),
        );
        let decoded = decode_location(&encoded).unwrap();

        assert_eq!(decoded.session_id, session_id);
        assert_eq!(decoded.step, WorkflowStep::Preview);
        assert_eq!(decoded.substep.as_deref(), Some("layout"));
        assert_eq!(decoded.parameters, Some(params));
        assert_eq!(decoded.url, encoded);
    }

    #[test]
    fn test_round_trip_minimal() {
        let session_id = Uuid::new_v4();
        let encoded = encode_location(&base(), session_id, WorkflowStep::Upload, None, None);
        let decoded = decode_location(&encoded).unwrap();

        assert_eq!(decoded.session_id, session_id);
        assert_eq!(decoded.step, WorkflowStep::Upload);
        assert_eq!(decoded.substep, None);
        assert_eq!(decoded.parameters, None);
    }

    #[test]
    fn test_session_id_lands_in_path() {
        let session_id = Uuid::new_v4();
        let encoded = encode_location(
            &base(),
            session_id,
            WorkflowStep::Analysis,
            Some("skills"),
            None,
        );
        let url = Url::parse(&encoded).unwrap();
        let segments: Vec<&str> = url.path_segments().unwrap().collect();
        assert!(segments.contains(&session_id.to_string().as_str()));
        assert!(segments.contains(&"skills"));
    }

    #[test]
    fn test_malformed_input_decodes_to_none() {
        assert!(decode_location("not a url").is_none());
        assert!(decode_location("https://app.cvflow.example/enhance").is_none());
        // Valid URL, missing the step field.
        let partial = format!(
            "https://app.cvflow.example/enhance?sessionId={}&timestamp=0",
            Uuid::new_v4()
        );
        assert!(decode_location(&partial).is_none());
        // Garbage base64 state.
        let bad_state = format!(
            "https://app.cvflow.example/e?sessionId={}&step=upload&state=!!&timestamp=0",
            Uuid::new_v4()
        );
        assert!(decode_location(&bad_state).is_none());
    }
}
