use super::archive::{check_upload_size, pack};
use super::{
    FieldKind, FormField, FormSchema, LanguageHandler, PackagedArtifact, RawPayload, UploadLimits,
    ValidationError,
};

/// Name of the answer file inside the packaged archive.
pub const ANSWER_FILE: &str = "answer.txt";

/// Plain-text answers, e.g. the output of a program the student ran locally.
///
/// The text is wrapped in a single-entry zip so workers see the same artifact
/// shape for every language.
#[derive(Debug, Clone)]
pub struct InputHandler {
    limits: UploadLimits,
}

impl InputHandler {
    pub fn new(limits: UploadLimits) -> Self {
        Self { limits }
    }
}

impl LanguageHandler for InputHandler {
    fn key(&self) -> &'static str {
        "input"
    }

    fn name(&self) -> &'static str {
        "Text answer"
    }

    fn validate(&self, payload: &RawPayload) -> Result<PackagedArtifact, ValidationError> {
        check_upload_size(&payload.bytes, &self.limits)?;
        let text = std::str::from_utf8(&payload.bytes).map_err(|_| ValidationError::NotUtf8)?;
        if text.trim().is_empty() {
            return Err(ValidationError::Empty);
        }

        let archive = pack(&[(ANSWER_FILE, text.as_bytes())])?;
        Ok(PackagedArtifact::new(archive, vec![ANSWER_FILE.to_string()]))
    }

    fn describe_form(&self) -> FormSchema {
        FormSchema {
            language: self.key().to_string(),
            title: "Answer file".to_string(),
            fields: vec![FormField {
                name: "handin".to_string(),
                label: "Answer".to_string(),
                kind: FieldKind::Text,
                accept: vec![".txt".to_string()],
                max_bytes: self.limits.max_upload_bytes,
                required: true,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::archive::inspect;

    #[test]
    fn test_packages_text_answer() {
        let handler = InputHandler::new(UploadLimits::default());
        let artifact = handler
            .validate(&RawPayload::new("out.txt", "42\n"))
            .unwrap();
        assert_eq!(artifact.files, vec![ANSWER_FILE]);
        assert_eq!(
            inspect(&artifact.archive, &UploadLimits::default()).unwrap(),
            vec![ANSWER_FILE]
        );
    }

    #[test]
    fn test_rejects_binary_and_blank() {
        let handler = InputHandler::new(UploadLimits::default());
        assert_eq!(
            handler.validate(&RawPayload::new("out.txt", vec![0xffu8, 0xfe, 0x00])),
            Err(ValidationError::NotUtf8)
        );
        assert_eq!(
            handler.validate(&RawPayload::new("out.txt", "  \n")),
            Err(ValidationError::Empty)
        );
    }

    #[test]
    fn test_form_is_text() {
        let form = InputHandler::new(UploadLimits::default()).describe_form();
        assert_eq!(form.fields[0].kind, FieldKind::Text);
    }
}
