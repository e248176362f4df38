use crate::models::{Document, LabeledDocument, Outcome, Token};

pub fn todo_token(exam_component_score: f64) -> Token {
    if exam_component_score < 30.0 {
        Token::LowTodo
    } else if exam_component_score < 60.0 {
        Token::MediumTodo
    } else {
        Token::GoodTodo
    }
}

pub fn presence_token(presence_score: f64) -> Token {
    if presence_score < 50.0 {
        Token::LowPresences
    } else if presence_score < 90.0 {
        Token::MediumPresences
    } else {
        Token::GoodPresences
    }
}

/// Exactly -1.0 is low and exactly 1.0 is medium.
pub fn motivation_token(delay_bonus_adjustment: f64) -> Token {
    if delay_bonus_adjustment <= -1.0 {
        Token::LowMotivation
    } else if delay_bonus_adjustment <= 1.0 {
        Token::MediumMotivation
    } else {
        Token::HighMotivation
    }
}

pub fn tokenize(
    exam_component_score: f64,
    presence_score: f64,
    delay_bonus_adjustment: f64,
) -> Document {
    [
        todo_token(exam_component_score),
        presence_token(presence_score),
        motivation_token(delay_bonus_adjustment),
    ]
}

pub fn to_documents(outcomes: &[Outcome]) -> Vec<LabeledDocument> {
    outcomes
        .iter()
        .map(|outcome| LabeledDocument {
            key: outcome.key,
            tokens: tokenize(
                outcome.exam_component_score,
                outcome.presence_score,
                outcome.delay_bonus_adjustment,
            ),
            label: outcome.label,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn todo_boundaries() {
        assert_eq!(todo_token(29.999), Token::LowTodo);
        assert_eq!(todo_token(30.0), Token::MediumTodo);
        assert_eq!(todo_token(59.99), Token::MediumTodo);
        assert_eq!(todo_token(60.0), Token::GoodTodo);
    }

    #[test]
    fn presence_boundaries() {
        assert_eq!(presence_token(49.9), Token::LowPresences);
        assert_eq!(presence_token(50.0), Token::MediumPresences);
        assert_eq!(presence_token(90.0), Token::GoodPresences);
    }

    #[test]
    fn motivation_boundaries_are_asymmetric() {
        assert_eq!(motivation_token(-1.5), Token::LowMotivation);
        assert_eq!(motivation_token(-1.0), Token::LowMotivation);
        assert_eq!(motivation_token(-0.99), Token::MediumMotivation);
        assert_eq!(motivation_token(1.0), Token::MediumMotivation);
        assert_eq!(motivation_token(1.01), Token::HighMotivation);
    }

    #[test]
    fn strong_student_document() {
        assert_eq!(
            tokenize(70.0, 95.0, 2.5),
            [Token::GoodTodo, Token::GoodPresences, Token::HighMotivation]
        );
    }
}
