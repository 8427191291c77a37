//! Prompt construction for guru analyses.

use crate::analysis::{distribution_summary, most_recent, rating_distribution};
use crate::models::{EntityMetadata, RatingStats, Review};

/// System prompt for the analysis call.
pub const SYSTEM_PROMPT: &str = r#"You are an assistant that summarizes customer reviews of a professional (a "guru").
Write a balanced profile in 3 to 5 short paragraphs: overall reputation, recurring strengths,
recurring complaints, and who the guru is a good fit for.
Only use information present in the reviews. Do not invent facts. Output plain text, no markdown."#;

/// Longest review excerpt passed to the model, in characters.
const MAX_REVIEW_CHARS: usize = 600;

/// Build the user prompt for one entity.
pub fn build_prompt(
    entity: &EntityMetadata,
    reviews: &[Review],
    stats: &RatingStats,
    max_reviews: usize,
) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!("Guru: {}\n", entity.name));
    if let Some(category) = &entity.category {
        prompt.push_str(&format!("Category: {}\n", category));
    }
    if let Some(location) = &entity.location {
        prompt.push_str(&format!("Location: {}\n", location));
    }
    if let Some(handle) = &entity.instagram_handle {
        prompt.push_str(&format!("Instagram: @{}\n", handle.trim_start_matches('@')));
    }

    prompt.push_str(&format!("Visible reviews: {}\n", stats.count));
    match stats.rounded_average() {
        Some(avg) => prompt.push_str(&format!("Average rating: {:.1} / 5\n", avg)),
        None => prompt.push_str("Average rating: none yet\n"),
    }
    prompt.push_str(&format!(
        "Distribution: {}\n\n",
        distribution_summary(&rating_distribution(reviews))
    ));

    let recent = most_recent(reviews, max_reviews);
    if recent.is_empty() {
        prompt.push_str("There are no reviews yet. Say so briefly.\n");
        return prompt;
    }

    prompt.push_str("=== REVIEWS (newest first) ===\n\n");
    for review in &recent {
        prompt.push_str(&format!(
            "[{}★, {}] {}\n\n",
            review.rating,
            review.created_at.format("%Y-%m-%d"),
            truncate(review.content.trim(), MAX_REVIEW_CHARS)
        ));
    }
    prompt.push_str("=== END OF REVIEWS ===\n\nNow write the profile:");

    prompt
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn metadata() -> EntityMetadata {
        EntityMetadata {
            id: "e1".to_string(),
            name: "Ada".to_string(),
            category: Some("Fitness".to_string()),
            location: None,
            instagram_handle: Some("@ada.fit".to_string()),
        }
    }

    fn review(id: &str, rating: u8, content: &str, age_days: i64) -> Review {
        Review {
            id: id.to_string(),
            entity_id: "e1".to_string(),
            rating,
            content: content.to_string(),
            hidden: false,
            created_at: Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()
                - Duration::days(age_days),
        }
    }

    #[test]
    fn test_prompt_includes_metadata_and_stats() {
        let reviews = vec![review("a", 5, "Great coach", 0), review("b", 3, "Okay", 1)];
        let stats = crate::analysis::compute_stats(&reviews);

        let prompt = build_prompt(&metadata(), &reviews, &stats, 10);

        assert!(prompt.contains("Guru: Ada"));
        assert!(prompt.contains("Category: Fitness"));
        assert!(prompt.contains("Instagram: @ada.fit"));
        assert!(prompt.contains("Average rating: 4.0 / 5"));
        assert!(prompt.contains("Great coach"));
        assert!(!prompt.contains("Location:"));
    }

    #[test]
    fn test_prompt_caps_review_count() {
        let reviews = vec![
            review("a", 5, "newest", 0),
            review("b", 4, "middle", 1),
            review("c", 3, "oldest", 2),
        ];
        let stats = crate::analysis::compute_stats(&reviews);

        let prompt = build_prompt(&metadata(), &reviews, &stats, 2);

        assert!(prompt.contains("newest"));
        assert!(prompt.contains("middle"));
        assert!(!prompt.contains("oldest"));
    }

    #[test]
    fn test_prompt_without_reviews() {
        let prompt = build_prompt(&metadata(), &[], &RatingStats::default(), 10);
        assert!(prompt.contains("Average rating: none yet"));
        assert!(prompt.contains("no reviews yet"));
    }

    #[test]
    fn test_truncate_long_content() {
        let long = "x".repeat(MAX_REVIEW_CHARS + 10);
        let cut = truncate(&long, MAX_REVIEW_CHARS);
        assert_eq!(cut.chars().count(), MAX_REVIEW_CHARS + 1);
        assert!(cut.ends_with('…'));
    }
}
