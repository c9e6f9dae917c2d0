use crate::extract::IssueDescription;

#[derive(Debug, Clone)]
pub struct LlmPrompt {
    pub system: String,
    pub user: String,
}

pub fn build_heal_prompt(issue: &IssueDescription) -> LlmPrompt {
    LlmPrompt {
        system: system_prompt(),
        user: user_prompt(issue),
    }
}

/* ============================================================
   System prompt (stable, reused)
   ============================================================ */

fn system_prompt() -> String {
    r#"
You are an expert Playwright engineer repairing end-to-end tests whose element locators broke.

Rules:
- Propose exactly one corrected locator for the failing step
- Prefer user-facing locators: getByRole / getByText / getByLabel first
- Then CSS selectors on stable attributes (id, data-testid, name, type)
- Use XPath only when nothing else can identify the element
- Do NOT rewrite unrelated steps or assertions
- Answer with a single code block containing either a selector string
  (role=button[name="Submit"], #id, text=Sign in) or one locator call
  such as page.getByRole('button', { name: 'Submit' })
"#
    .trim()
    .to_string()
}

/* ============================================================
   User prompt (derived from the failure)
   ============================================================ */

fn user_prompt(issue: &IssueDescription) -> String {
    let mut out = String::new();

    out.push_str("The test for the following action failed due to a selector issue:\n\n");
    out.push_str(issue.text.trim());
    out.push_str("\n\n");

    if let Some(loc) = &issue.locator {
        out.push_str(&format!("Failing locator: {}\n\n", loc));
    }

    out.push_str(
        "Based on best practices in Playwright, suggest a corrected selector or action.\n\
         Return it as a code fragment, for example:\n\
         ```\n\
         button[type=\"submit\"]\n\
         ```\n",
    );

    out
}
