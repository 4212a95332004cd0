use std::fmt::Write as _;

use munje_contracts::generation::Problem;
use munje_contracts::runs::history::SavedProblemSet;
use munje_engine::ModelCheck;

const PRINT_TITLE: &str = "유사 문제";
const ANSWER_TITLE: &str = "정답 및 풀이";

/// Numbered problem list for the terminal. Answers are indented under each
/// problem when `show_answers` is set.
pub fn render_problem_list(problems: &[Problem], show_answers: bool) -> String {
    if problems.is_empty() {
        return "생성된 문제가 없습니다.\n".to_string();
    }
    let mut out = String::new();
    for (idx, problem) in problems.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", idx + 1, problem.question.trim());
        if show_answers {
            for line in problem.answer.trim().lines() {
                let _ = writeln!(out, "   {line}");
            }
        }
    }
    out
}

/// Printable sheet: every problem first, then a separate answers section.
pub fn render_print_layout(problems: &[Problem], subtitle: Option<&str>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{PRINT_TITLE}");
    if let Some(subtitle) = subtitle.map(str::trim).filter(|text| !text.is_empty()) {
        let _ = writeln!(out, "{subtitle}");
    }
    let _ = writeln!(out);
    for (idx, problem) in problems.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", idx + 1, problem.question.trim());
        let _ = writeln!(out);
    }
    let _ = writeln!(out, "{}", "-".repeat(40));
    let _ = writeln!(out, "{ANSWER_TITLE}");
    let _ = writeln!(out);
    for (idx, problem) in problems.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", idx + 1, problem.answer.trim());
    }
    out
}

/// One line per saved set: short id, relative time, problem count and the
/// first question as a teaser.
pub fn render_history_row(entry: &SavedProblemSet, relative_time: &str) -> String {
    let short_id = entry.id.chars().take(8).collect::<String>();
    let teaser = entry
        .questions
        .first()
        .map(|problem| munje_engine::truncate_text(problem.question.trim(), 40))
        .unwrap_or_default();
    format!(
        "{short_id}  {relative_time:<10}  {count}문제  {teaser}",
        count = entry.questions.len()
    )
}

/// `✅ model: reply` for a model that answered, `❌ model [kind]: error`
/// otherwise. Reply and error text are cut short.
pub fn render_model_check(check: &ModelCheck) -> String {
    match &check.result {
        Ok(text) => format!(
            "✅ {}: {}",
            check.model,
            munje_engine::truncate_text(text.trim(), 50)
        ),
        Err(err) => format!(
            "❌ {} [{}]: {}",
            check.model,
            err.classify().as_str(),
            munje_engine::truncate_text(err.diagnostic(), 80)
        ),
    }
}
