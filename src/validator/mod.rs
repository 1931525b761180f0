//! Content shape validation
//!
//! Saved content is XML whose vocabulary is constrained per tenant: every
//! element name must match the tenant's element pattern, every attribute
//! name its attribute pattern, and character content is not allowed at all.
//! Validation reports the full list of violations; canonicalization re-emits
//! the document with uniform indentation so stored revisions diff cleanly.

use crate::error::ValidatorError;
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::Event;
use regex::Regex;

/// Per-tenant XML shape validator
#[derive(Debug, Clone)]
pub struct ContentValidator {
    element_pattern: Regex,
    attribute_pattern: Regex,
}

impl ContentValidator {
    /// Patterns must already be validated by the config loader.
    pub fn new(element_pattern: &str, attribute_pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            element_pattern: Regex::new(element_pattern)?,
            attribute_pattern: Regex::new(attribute_pattern)?,
        })
    }

    /// Collect all shape violations; an empty list means valid.
    ///
    /// A document that does not parse at all yields a single violation
    /// describing the parse failure.
    pub fn validate(&self, content: &str) -> Vec<String> {
        let mut errors = Vec::new();
        let mut reader = Reader::from_str(content);

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref element)) | Ok(Event::Empty(ref element)) => {
                    let name = String::from_utf8_lossy(element.name().as_ref()).to_string();
                    if !self.element_pattern.is_match(&name) {
                        errors.push(format!("Invalid element name: {}", name));
                    }
                    for attribute in element.attributes() {
                        match attribute {
                            Ok(attribute) => {
                                let attr_name =
                                    String::from_utf8_lossy(attribute.key.as_ref()).to_string();
                                if !self.attribute_pattern.is_match(&attr_name) {
                                    errors.push(format!("Invalid attribute name: {}", attr_name));
                                }
                            }
                            Err(e) => {
                                errors.push(format!("Malformed attribute in {}: {}", name, e));
                            }
                        }
                    }
                }
                Ok(Event::Text(ref text)) => {
                    let value = text
                        .unescape()
                        .map(|cow| cow.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(text.as_ref()).to_string());
                    if !value.trim().is_empty() {
                        errors.push(format!("Invalid character content: {}", value.trim()));
                    }
                }
                Ok(Event::CData(ref data)) => {
                    let value = String::from_utf8_lossy(data.as_ref()).to_string();
                    errors.push(format!("Invalid character content: {}", value.trim()));
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    errors.push(format!("Malformed content: {}", e));
                    break;
                }
            }
        }

        errors
    }

    /// Re-emit the document with two-space indentation.
    ///
    /// Whitespace-only text nodes are dropped so the writer controls layout.
    pub fn canonicalize(&self, content: &str) -> Result<String, ValidatorError> {
        let mut reader = Reader::from_str(content);
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        loop {
            match reader.read_event() {
                Ok(Event::Eof) => break,
                Ok(Event::Text(ref text)) => {
                    let value = text
                        .unescape()
                        .map_err(|e| ValidatorError::Canonicalize(e.to_string()))?;
                    if !value.trim().is_empty() {
                        writer
                            .write_event(Event::Text(text.clone()))
                            .map_err(|e| ValidatorError::Canonicalize(e.to_string()))?;
                    }
                }
                Ok(event) => {
                    writer
                        .write_event(event)
                        .map_err(|e| ValidatorError::Canonicalize(e.to_string()))?;
                }
                Err(e) => return Err(ValidatorError::Malformed(e.to_string())),
            }
        }

        String::from_utf8(writer.into_inner())
            .map_err(|e| ValidatorError::Canonicalize(e.to_string()))
    }
}
