//! Ticket and issue texts

use conform_core::findings::{ErrorDetail, Finding, FindingError, FindingKind};

use crate::contracts::IssueRecord;

/// Prefix of the signature line closing every comment
pub const SIGNATURE_PREFIX: &str = "Signature: ";

/// Title of the ticket collecting a topic's message and schema findings
pub fn ticket_title(topic_name: &str, schema_tag: &str) -> String {
    format!("Messages not conform schema: topic '{topic_name}' schema '{schema_tag}'")
}

/// Title an issue is published under
pub fn issue_title(finding: &Finding) -> String {
    match finding.kind {
        FindingKind::Blob => format!(
            "Blob could not be parsed: topic '{}' schema '{}'",
            finding.topic_name, finding.schema_tag
        ),
        FindingKind::Schema => format!(
            "Schema not conform correct format: topic '{}' schema '{}'",
            finding.topic_name, finding.schema_tag
        ),
        FindingKind::Message => ticket_title(&finding.topic_name, &finding.schema_tag),
    }
}

/// Tracker query for tickets titled `title`
///
/// The tracker matches `~` loosely, callers compare titles exactly.
pub fn search_query(project: &str, title: &str) -> String {
    let escaped = title.replace('\\', "\\\\").replace('"', "\\\"");
    format!("project = \"{project}\" AND summary ~ \"\\\"{escaped}\\\"\"")
}

pub fn description(topic_name: &str, schema_tag: &str) -> String {
    format!(
        "The topic `{topic_name}` received messages that are not conform its schema ({schema_tag}). \
         The messages with their errors can be found in the comments of this ticket. \
         Please check why the messages are not conform the schema."
    )
}

/// `a/b/c` rendering of a key path, the root renders as `/`
fn key_path(segments: &[String]) -> String {
    if segments.is_empty() {
        "/".to_string()
    } else {
        segments.join("/")
    }
}

/// The parts a comment is assembled from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentParts {
    /// Where the offending blob lives, empty for schema findings
    pub location: String,
    pub error: String,
    pub schema_key: String,
}

impl CommentParts {
    pub fn for_finding(finding: &Finding) -> Self {
        match (&finding.kind, &finding.error) {
            (FindingKind::Message, FindingError::Validation(detail)) => Self {
                location: format!(
                    "Wrong message can be found in blob {} in history bucket {}\n\
                     The error in the message can be found in key: {}",
                    finding.blob_full_name,
                    finding.history_bucket,
                    key_path(&detail.path)
                ),
                error: format!("The error for this key is: {}", detail.message),
                schema_key: schema_key(detail),
            },
            (FindingKind::Schema, FindingError::Validation(detail)) => Self {
                location: String::new(),
                error: format!("The error for this schema is: {}", detail.message),
                schema_key: format!("The error can be found in key: {}", key_path(&detail.schema_path)),
            },
            (_, error) => Self {
                location: format!(
                    "Wrong blob {} is in history bucket {}",
                    finding.blob_full_name, finding.history_bucket
                ),
                error: format!("The error for parsing this blob is: {}", error.message()),
                schema_key: String::new(),
            },
        }
    }

    /// Comment body without the signature line
    pub fn body(&self) -> String {
        [&self.location, &self.error, &self.schema_key]
            .into_iter()
            .filter(|part| !part.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn schema_key(detail: &ErrorDetail) -> String {
    format!(
        "In the schema, the error can be found in key: {}",
        key_path(&detail.schema_path)
    )
}

/// Signature line identifying the error of a finding
pub fn signature_line(finding: &Finding) -> String {
    format!("{SIGNATURE_PREFIX}{}", short_signature(finding))
}

/// First 16 hex characters of the error signature
pub fn short_signature(finding: &Finding) -> String {
    finding.error_signature().chars().take(16).collect()
}

/// Full ticket comment for a finding
pub fn comment(finding: &Finding) -> String {
    format!(
        "{}\n\n{}",
        CommentParts::for_finding(finding).body(),
        signature_line(finding)
    )
}

/// Signatures carried by existing comments
pub fn parse_signatures<'a, I>(comments: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    comments
        .into_iter()
        .flat_map(str::lines)
        .filter_map(|line| line.trim().strip_prefix(SIGNATURE_PREFIX))
        .map(|signature| signature.trim().to_string())
        .filter(|signature| !signature.is_empty())
        .collect()
}

/// Published form of a finding
pub fn issue_record(finding: &Finding) -> IssueRecord {
    let parts = CommentParts::for_finding(finding);
    IssueRecord {
        title: issue_title(finding),
        description: description(&finding.topic_name, &finding.schema_tag),
        comment: parts.body(),
        comment_error: parts.error,
        comment_schema_key: parts.schema_key,
        schema: finding.schema_tag.clone(),
        topic_name: finding.topic_name.clone(),
        bucket: finding.history_bucket.clone(),
        blob_name: finding.blob_full_name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conform_core::findings::BlobContext;
    use proptest::prelude::*;
    use serde_json::json;

    fn context(blob: &str) -> BlobContext {
        BlobContext {
            schema_tag: "schemas/orders".to_string(),
            topic_name: "orders".to_string(),
            history_bucket: "orders-history-stg".to_string(),
            blob_full_name: blob.to_string(),
        }
    }

    fn message_finding(blob: &str) -> Finding {
        let detail = ErrorDetail::new("\"id\" is a required property")
            .with_paths(vec!["items".into(), "0".into()], vec!["properties".into(), "items".into(), "required".into()])
            .with_validator("required", json!(["id"]));
        context(blob).finding(FindingKind::Message, FindingError::Validation(detail))
    }

    #[test]
    fn test_titles() {
        let finding = message_finding("a.xz");
        assert_eq!(
            issue_title(&finding),
            "Messages not conform schema: topic 'orders' schema 'schemas/orders'"
        );

        let blob = context("a.xz").finding(FindingKind::Blob, FindingError::Blob("truncated".into()));
        assert!(issue_title(&blob).starts_with("Blob could not be parsed:"));
    }

    #[test]
    fn test_schema_issue_title_differs_from_ticket() {
        let detail = ErrorDetail::new("bad pattern");
        let finding = context("a.xz").finding(FindingKind::Schema, FindingError::Validation(detail));
        assert_eq!(
            issue_title(&finding),
            "Schema not conform correct format: topic 'orders' schema 'schemas/orders'"
        );
        assert_eq!(
            issue_record(&finding).title,
            "Schema not conform correct format: topic 'orders' schema 'schemas/orders'"
        );
    }

    #[test]
    fn test_search_query_quotes_title() {
        let query = search_query("DAT", "topic 'a' \"b\"");
        assert_eq!(
            query,
            r#"project = "DAT" AND summary ~ "\"topic 'a' \"b\"\"""#
        );
    }

    #[test]
    fn test_message_comment() {
        let text = comment(&message_finding("2024/01/01/a.xz"));
        assert!(text.starts_with(
            "Wrong message can be found in blob 2024/01/01/a.xz in history bucket orders-history-stg"
        ));
        assert!(text.contains("The error in the message can be found in key: items/0"));
        assert!(text.contains("The error for this key is: \"id\" is a required property"));
        assert!(text.contains("In the schema, the error can be found in key: properties/items/required"));
        assert!(text.lines().last().unwrap().starts_with(SIGNATURE_PREFIX));
    }

    #[test]
    fn test_schema_comment_has_no_location() {
        let detail = ErrorDetail::new("bad pattern").with_paths(vec![], vec!["properties".into(), "id".into()]);
        let finding = context("a.xz").finding(FindingKind::Schema, FindingError::Validation(detail));
        let parts = CommentParts::for_finding(&finding);

        assert!(parts.location.is_empty());
        assert_eq!(parts.body(), "The error for this schema is: bad pattern\nThe error can be found in key: properties/id");
    }

    #[test]
    fn test_signature_ignores_blob() {
        let a = message_finding("a.xz");
        let b = message_finding("b.xz");
        assert_ne!(comment(&a), comment(&b));
        assert_eq!(signature_line(&a), signature_line(&b));
    }

    #[test]
    fn test_parse_signatures() {
        let first = comment(&message_finding("a.xz"));
        let comments = [first.as_str(), "manual note", "Signature:   "];
        assert_eq!(
            parse_signatures(comments),
            vec![short_signature(&message_finding("a.xz"))]
        );
    }

    #[test]
    fn test_issue_record() {
        let record = issue_record(&message_finding("a.xz"));
        assert_eq!(record.bucket, "orders-history-stg");
        assert_eq!(record.blob_name, "a.xz");
        assert!(record.comment_schema_key.starts_with("In the schema"));
        assert!(!record.comment.contains(SIGNATURE_PREFIX));
    }

    proptest! {
        #[test]
        fn prop_comment_carries_its_signature(message in "\\PC{0,200}") {
            let detail = ErrorDetail::new(message);
            let finding = context("a.xz").finding(FindingKind::Message, FindingError::Validation(detail));
            let text = comment(&finding);
            prop_assert_eq!(
                parse_signatures([text.as_str()]).last().cloned(),
                Some(short_signature(&finding))
            );
        }
    }
}
