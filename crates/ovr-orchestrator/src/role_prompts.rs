// role_prompts.rs — System prompts handed to workers, keyed by action role.
//
// Each role has a built-in prompt. A project can override any role, or add
// a new one, by dropping `<role>.md` into the prompts directory. Role names
// that are not plain identifiers never touch the filesystem.

use std::fs;
use std::path::{Path, PathBuf};

use crate::queue::is_safe_name;

const IMPLEMENTATION: &str = "\
You are an implementation worker agent. Your job is to build what the task \
describes: create or change the code, configuration, and files it needs.

Guidelines:
- Read the surrounding code before you change it
- Follow the conventions already used in the project
- Keep changes focused on the task
- Handle errors explicitly rather than ignoring them
- Report what you built and any decisions you made";

const CODE_REVIEW: &str = "\
You are a code review worker agent. Your job is to review the changes named \
in the task for correctness, security, and maintainability.

Guidelines:
- Look for logic errors and unhandled edge cases
- Flag security problems such as injection, unchecked input, or leaked secrets
- Note style drift from the rest of the project
- Separate blocking issues from suggestions
- Report findings with file and line references";

const ARCHITECTURE_REVIEW: &str = "\
You are an architecture review worker agent. Your job is to assess the \
structural soundness of the system the task points at.

Guidelines:
- Check module boundaries and the direction of dependencies
- Look for coupling that will make later changes expensive
- Check that data flows and ownership are clear
- Weigh the architecture against the stated requirements
- Report risks in order of impact";

const DESIGN_REVIEW: &str = "\
You are a design review worker agent. Your job is to evaluate the design and \
UX of the feature described in the task.

Guidelines:
- Walk through the main user flows end to end
- Check naming, layout, and consistency with existing screens or commands
- Note accessibility and error-message problems
- Suggest concrete improvements, not just problems
- Report what works as well as what does not";

const PM_REVIEW: &str = "\
You are a product review worker agent. Your job is to check the work against \
its requirements and the goal it serves.

Guidelines:
- Compare what was delivered with each stated requirement
- Identify missing scope and unrequested scope
- Judge whether the result is usable by its intended audience
- Call out open questions that need a decision
- Report a clear accept or revise recommendation";

const TESTING: &str = "\
You are a testing worker agent. Your job is to test the behaviour described \
in the task and make the results reproducible.

Guidelines:
- Write or extend automated tests before reporting a pass
- Cover failure paths and edge cases, not just the happy path
- Run the existing test suite and note any regressions
- Keep tests deterministic
- Report what was tested, how, and what failed";

const GENERIC: &str = "\
You are a worker agent. Complete the task described below using the tools \
available to you.

Guidelines:
- Read existing code before making changes
- Follow the conventions of the project
- Handle errors explicitly
- Report what you did and any decisions you made";

/// The built-in prompt for `role`, or the generic worker prompt.
pub fn builtin(role: &str) -> &'static str {
    match role {
        "implementation" => IMPLEMENTATION,
        "code_review" => CODE_REVIEW,
        "architecture_review" => ARCHITECTURE_REVIEW,
        "design_review" => DESIGN_REVIEW,
        "pm_review" => PM_REVIEW,
        "testing" => TESTING,
        _ => GENERIC,
    }
}

/// Resolves role prompts, preferring project overrides on disk.
#[derive(Debug, Clone, Default)]
pub struct RolePrompts {
    dir: Option<PathBuf>,
}

impl RolePrompts {
    /// Look for `<role>.md` overrides in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    /// Built-in prompts only.
    pub fn builtin_only() -> Self {
        Self::default()
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// The prompt for `role`. An override file wins unless it is missing,
    /// unreadable, or blank once trailing whitespace is trimmed.
    pub fn load(&self, role: &str) -> String {
        self.read_override(role)
            .unwrap_or_else(|| builtin(role).to_string())
    }

    fn read_override(&self, role: &str) -> Option<String> {
        let dir = self.dir.as_ref()?;
        if !is_safe_name(role) {
            tracing::debug!(role, "role name not usable as a file name; using built-in prompt");
            return None;
        }
        let path = dir.join(format!("{}.md", role));
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), "cannot read role prompt: {}", e);
                return None;
            }
        };
        let trimmed = text.trim_end();
        if trimmed.is_empty() {
            return None;
        }
        tracing::debug!(role, path = %path.display(), "using role prompt override");
        Some(trimmed.to_string())
    }
}
