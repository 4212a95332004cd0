/// Instruction sent ahead of the image on every attempt.
pub const INSTRUCTION_PROMPT: &str = r#"Role: You are an expert in mathematics education.
Context: The user has uploaded one image.

Task:
1. Decide first whether the image shows a math problem.
2. If it does NOT, reply with exactly:
   {"notMathProblem": true, "message": "수학 문제가 아닌 이미지입니다."}
3. If it does:
   - Identify the mathematical principle the problem is built on.
   - Infer the grade level the problem is written for.
   - Write 10 NEW problems that use the same principle at the same difficulty.
   - Write every question and answer in Korean.
   - Each answer must show the full step-by-step solution and end with the final result.

Reply with JSON only, in one of these two shapes.

Math problem:
{
  "questions": [
    {
      "question": "문제 (Korean)",
      "answer": "단계별 풀이와 정답 (Korean)"
    }
  ]
}

Not a math problem:
{
  "notMathProblem": true,
  "message": "수학 문제가 아닌 이미지입니다."
}"#;

#[cfg(test)]
mod tests {
    use super::INSTRUCTION_PROMPT;
    use crate::generation::NOT_MATH_DEFAULT_MESSAGE;

    #[test]
    fn prompt_names_both_reply_shapes() {
        assert!(INSTRUCTION_PROMPT.contains("\"questions\""));
        assert!(INSTRUCTION_PROMPT.contains("\"notMathProblem\": true"));
        assert!(INSTRUCTION_PROMPT.contains(NOT_MATH_DEFAULT_MESSAGE));
        assert!(INSTRUCTION_PROMPT.contains("10 NEW problems"));
        assert!(INSTRUCTION_PROMPT.contains("step-by-step"));
    }
}
