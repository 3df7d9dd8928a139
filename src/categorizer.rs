use crate::concept::Category;

/// Classifies a definition into a knowledge dimension using weighted keyword scoring.
///
/// Used when the enrichment output omits the category or names one we don't know.
pub struct Categorizer;

impl Categorizer {
    pub fn classify(text: &str) -> Category {
        let lower = text.to_lowercase();

        let keyword_categories: &[(&str, Category, u32)] = &[
            ("step", Category::Procedural, 8),
            ("how to", Category::Procedural, 10),
            ("method", Category::Procedural, 5),
            ("process of", Category::Procedural, 6),
            ("procedure", Category::Procedural, 10),
            ("theory", Category::Conceptual, 10),
            ("concept", Category::Conceptual, 8),
            ("idea", Category::Conceptual, 5),
            ("principle", Category::Conceptual, 7),
            ("framework", Category::Conceptual, 5),
            ("what if", Category::Adversarial, 10),
            ("challenge", Category::Adversarial, 5),
            ("really", Category::Adversarial, 3),
            ("assumption", Category::Adversarial, 7),
            ("is a", Category::Factual, 3),
            ("located", Category::Factual, 7),
            ("measured", Category::Factual, 7),
            ("born", Category::Factual, 7),
            ("founded", Category::Factual, 7),
        ];

        let mut scores: std::collections::HashMap<Category, u32> = std::collections::HashMap::new();

        for &(keyword, category, weight) in keyword_categories {
            if lower.contains(keyword) {
                *scores.entry(category).or_insert(0) += weight;
            }
        }

        // Questions lean adversarial.
        if text.trim_end().ends_with('?') {
            *scores.entry(Category::Adversarial).or_insert(0) += 5;
        }

        // Ties resolve toward the earlier, more common dimension.
        let order = [
            Category::Conceptual,
            Category::Factual,
            Category::Procedural,
            Category::Adversarial,
        ];
        order
            .into_iter()
            .filter_map(|c| scores.get(&c).map(|s| (c, *s)))
            .fold(None, |best: Option<(Category, u32)>, (c, s)| match best {
                Some((_, bs)) if bs >= s => best,
                _ => Some((c, s)),
            })
            .map(|(c, _)| c)
            .unwrap_or(Category::Conceptual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_procedural() {
        assert_eq!(
            Categorizer::classify("How to tie a shoe: step one, cross the laces."),
            Category::Procedural
        );
    }

    #[test]
    fn classify_conceptual() {
        assert_eq!(
            Categorizer::classify("The theory of evolution connects many observations."),
            Category::Conceptual
        );
    }

    #[test]
    fn classify_adversarial_question() {
        assert_eq!(
            Categorizer::classify("What if gravity is not a force at all?"),
            Category::Adversarial
        );
    }

    #[test]
    fn classify_factual() {
        assert_eq!(
            Categorizer::classify("Mount Everest is located in the Himalayas."),
            Category::Factual
        );
    }

    #[test]
    fn classify_defaults_to_conceptual() {
        assert_eq!(Categorizer::classify("zzz"), Category::Conceptual);
    }

    #[test]
    fn classify_tie_prefers_conceptual() {
        // "idea" → conceptual(5), "method" → procedural(5)
        assert_eq!(
            Categorizer::classify("an idea and a method"),
            Category::Conceptual
        );
    }
}
