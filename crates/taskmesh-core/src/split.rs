//! Job-param splitting.
//!
//! `NORMAL` jobs split `jobParam` into one task per comma-separated segment;
//! a job with no param produces exactly one task with no param. This is the
//! one piece of "trigger-type interpretation" the core owns directly — cron
//! and DAG expression parsing are external collaborators per scope.

use crate::EngineError;

/// Split a job's `jobParam` into per-task params.
///
/// # Errors
/// [`EngineError::InvalidSplit`] if `job_param` is `Some` but trims to an
/// empty string — an explicitly-empty param is a configuration error, not
/// "no param".
pub fn split(job_id: i64, job_param: Option<&str>) -> Result<Vec<Option<String>>, EngineError> {
    let Some(raw) = job_param else {
        return Ok(vec![None]);
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidSplit {
            job_id,
            reason: "jobParam is present but empty".into(),
        });
    }

    let parts: Vec<Option<String>> = trimmed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Some(s.to_owned()))
        .collect();

    if parts.is_empty() {
        return Err(EngineError::InvalidSplit {
            job_id,
            reason: "jobParam contained only separators".into(),
        });
    }

    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_param_yields_single_task_with_none() {
        assert_eq!(split(1, None).unwrap(), vec![None]);
    }

    #[test]
    fn comma_separated_param_yields_one_task_per_segment() {
        let result = split(1, Some("a, b,c")).unwrap();
        assert_eq!(result, vec![Some("a".into()), Some("b".into()), Some("c".into())]);
    }

    #[test]
    fn single_param_yields_single_task() {
        assert_eq!(split(1, Some("only")).unwrap(), vec![Some("only".into())]);
    }

    #[test]
    fn empty_param_is_rejected() {
        assert!(matches!(split(1, Some("   ")), Err(EngineError::InvalidSplit { .. })));
    }

    #[test]
    fn only_separators_is_rejected() {
        assert!(matches!(split(1, Some(",,,")), Err(EngineError::InvalidSplit { .. })));
    }
}
