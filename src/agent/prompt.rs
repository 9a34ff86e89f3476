//! Composes the system and user prompts handed to a freshly spawned agent.

use std::path::Path;

use anyhow::Result;
use minijinja::{Environment, context};

use crate::store::Task;

const USER_PROMPT_TEMPLATE: &str = r#"You are working on task `{{ task_name }}`.
{% if worktree_path %}Your working directory is an isolated git worktree at {{ worktree_path }}, checked out on branch `{{ task_name }}`.{% endif %}

When you are done, run `{{ end_task_script }}` to commit, push, and close out this task.

## Task

{{ content }}
"#;

/// Compose the system prompt: global prompt file (if any) then the
/// project-local one, separated by a blank line. Missing files are skipped.
pub fn compose_system_prompt(global_prompt_path: Option<&Path>, project_prompt_path: Option<&Path>) -> String {
    let mut parts = Vec::new();
    for path in [global_prompt_path, project_prompt_path].into_iter().flatten() {
        if let Ok(contents) = std::fs::read_to_string(path) {
            let trimmed = contents.trim();
            if !trimmed.is_empty() {
                parts.push(trimmed.to_string());
            }
        }
    }
    parts.join("\n\n")
}

pub fn compose_user_prompt(task: &Task, worktree_path: Option<&Path>) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("user_prompt", USER_PROMPT_TEMPLATE)?;
    let tmpl = env.get_template("user_prompt")?;
    let rendered = tmpl.render(context! {
        task_name => task.name,
        worktree_path => worktree_path.map(|p| p.display().to_string()),
        end_task_script => task.end_task_script_path().display().to_string(),
        content => task.content().unwrap_or_default(),
    })?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn composes_system_prompt_from_both_files() {
        let tmp = tempfile::tempdir().unwrap();
        let global = tmp.path().join("global.md");
        let project = tmp.path().join("project.md");
        fs::write(&global, "Be concise.").unwrap();
        fs::write(&project, "Follow the style guide.").unwrap();

        let composed = compose_system_prompt(Some(&global), Some(&project));
        assert!(composed.contains("Be concise."));
        assert!(composed.contains("Follow the style guide."));
    }

    #[test]
    fn missing_prompt_files_are_skipped() {
        let composed = compose_system_prompt(None, None);
        assert_eq!(composed, "");
    }

    #[test]
    fn user_prompt_includes_task_content() {
        let tmp = tempfile::tempdir().unwrap();
        let task = Task::new(tmp.path(), "fix-login-bug");
        std::fs::create_dir_all(&task.dir).unwrap();
        task.write_content("Fix the login redirect loop.").unwrap();

        let rendered = compose_user_prompt(&task, None).unwrap();
        assert!(rendered.contains("fix-login-bug"));
        assert!(rendered.contains("Fix the login redirect loop."));
    }
}
