//! Commit status target URLs.
//!
//! Templates are plain text with `{.Field}` placeholders, e.g.
//! `{.BaseURL}/teams/{.Namespace}/projects/{.Owner}/{.Repository}/{.Branch}/{.Build}`.

use thiserror::Error;

use crate::config::PipelineConfig;
use crate::jobs::Job;
use crate::jobs::launcher::build_branch;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unclosed placeholder at byte {0}")]
    Unclosed(usize),

    #[error("unknown template field {0:?}")]
    UnknownField(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    BaseUrl,
    Namespace,
    Owner,
    Repository,
    Branch,
    Build,
    Context,
}

impl Field {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "BaseURL" => Field::BaseUrl,
            "Namespace" => Field::Namespace,
            "Owner" => Field::Owner,
            "Repository" => Field::Repository,
            "Branch" => Field::Branch,
            "Build" => Field::Build,
            "Context" => Field::Context,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Field(Field),
}

/// Values substituted into a template.
#[derive(Debug, Clone, Default)]
pub struct UrlFields<'a> {
    pub base_url: &'a str,
    pub namespace: &'a str,
    pub owner: &'a str,
    pub repository: &'a str,
    pub branch: &'a str,
    pub build: &'a str,
    pub context: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    segments: Vec<Segment>,
}

impl UrlTemplate {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = template;
        let mut offset = 0;
        while let Some(start) = rest.find("{.") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or(TemplateError::Unclosed(offset + start))?;
            let name = after[..end].trim();
            let field = Field::parse(name).ok_or_else(|| TemplateError::UnknownField(name.to_string()))?;
            segments.push(Segment::Field(field));
            let consumed = start + 2 + end + 1;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }
        Ok(Self { segments })
    }

    pub fn render(&self, fields: &UrlFields<'_>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(t) => out.push_str(t),
                Segment::Field(f) => out.push_str(match f {
                    Field::BaseUrl => fields.base_url.trim_end_matches('/'),
                    Field::Namespace => fields.namespace,
                    Field::Owner => fields.owner,
                    Field::Repository => fields.repository,
                    Field::Branch => fields.branch,
                    Field::Build => fields.build,
                    Field::Context => fields.context,
                }),
            }
        }
        out
    }
}

/// The target URL for `job`'s status, if a report base URL is configured
/// and the template is valid.
pub fn target_url(pipeline: &PipelineConfig, job: &Job) -> Result<Option<String>, TemplateError> {
    let Some(base_url) = pipeline.report_url_base.as_deref().filter(|b| !b.is_empty()) else {
        return Ok(None);
    };
    let Some(refs) = job.spec.refs.as_ref() else {
        return Ok(None);
    };
    let template = UrlTemplate::parse(&pipeline.report_url_template)?;
    let branch = build_branch(job).unwrap_or_default();
    Ok(Some(template.render(&UrlFields {
        base_url,
        namespace: &job.metadata.namespace,
        owner: &refs.org,
        repository: &refs.repo,
        branch: &branch,
        build: &job.status.build_id,
        context: &job.spec.context,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_REPORT_URL_TEMPLATE;
    use crate::jobs::JobState;
    use crate::jobs::job::test_job;

    #[test]
    fn renders_default_template() {
        let mut job = test_job("j", "unit", 7, "abc", JobState::Running);
        job.status.build_id = "3".to_string();
        let pipeline = PipelineConfig {
            report_url_base: Some("https://dash.example.com/".to_string()),
            ..Default::default()
        };
        assert_eq!(
            target_url(&pipeline, &job).unwrap().as_deref(),
            Some("https://dash.example.com/teams/jx/projects/org/repo/PR-7/3")
        );
    }

    #[test]
    fn no_base_url_means_no_link() {
        let job = test_job("j", "unit", 7, "abc", JobState::Running);
        assert_eq!(target_url(&PipelineConfig::default(), &job).unwrap(), None);
    }

    #[test]
    fn parse_errors() {
        assert_eq!(
            UrlTemplate::parse("{.BaseURL}/{.Nope}"),
            Err(TemplateError::UnknownField("Nope".to_string()))
        );
        assert_eq!(UrlTemplate::parse("x/{.Build"), Err(TemplateError::Unclosed(2)));
        assert!(UrlTemplate::parse(DEFAULT_REPORT_URL_TEMPLATE).is_ok());
    }

    #[test]
    fn plain_text_passes_through() {
        let t = UrlTemplate::parse("https://ci/{.Context}?x={y}").unwrap();
        let fields = UrlFields {
            context: "lint",
            ..Default::default()
        };
        assert_eq!(t.render(&fields), "https://ci/lint?x={y}");
    }
}
