//! Lead scoring.
//!
//! Deterministic 0-100 estimate of a conversation's sales value, derived
//! from the collected profile draft and engagement level at session end.

use serde::Serialize;

use super::PatientInfo;

/// Treatment keywords that mark a lead as high value. Matched as
/// case-insensitive substrings of recorded interests.
const HIGH_VALUE_TREATMENTS: &[&str] = &[
    "hair transplant",
    "dental implant",
    "rhinoplasty",
    "ivf",
    "bariatric",
    "veneers",
];

/// Categorical lead temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    Hot,
    Warm,
    Cold,
}

impl LeadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LeadStatus::Hot => "hot",
            LeadStatus::Warm => "warm",
            LeadStatus::Cold => "cold",
        }
    }
}

/// Computed score with its status band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeadScore {
    pub score: u8,
    pub status: LeadStatus,
}

/// Score a conversation.
///
/// Contact completeness: +10 name, +15 phone, +5 email.
/// Personal detail: +5 each for age, country, city.
/// Treatment interest: +15 for any interest, +15 more if any interest
/// contains a high-value keyword.
/// Engagement by user-message count: >=10 -> +25, >=5 -> +15, >=3 -> +10,
/// >=1 -> +5.
pub fn score_lead(info: &PatientInfo, user_messages: usize) -> LeadScore {
    let mut score: u8 = 0;

    if info.full_name.is_some() {
        score += 10;
    }
    if info.phone.is_some() {
        score += 15;
    }
    if info.email.is_some() {
        score += 5;
    }

    if info.age.is_some() {
        score += 5;
    }
    if info.country.is_some() {
        score += 5;
    }
    if info.city.is_some() {
        score += 5;
    }

    if !info.interested_treatments.is_empty() {
        score += 15;
        let high_value = info.interested_treatments.iter().any(|interest| {
            let lowered = interest.to_lowercase();
            HIGH_VALUE_TREATMENTS.iter().any(|kw| lowered.contains(kw))
        });
        if high_value {
            score += 15;
        }
    }

    score += match user_messages {
        n if n >= 10 => 25,
        n if n >= 5 => 15,
        n if n >= 3 => 10,
        n if n >= 1 => 5,
        _ => 0,
    };

    let status = if score >= 70 {
        LeadStatus::Hot
    } else if score >= 40 {
        LeadStatus::Warm
    } else {
        LeadStatus::Cold
    };

    LeadScore { score, status }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_profile_is_hot() {
        // name(10) + phone(15) + age(5) + country(5) + interest(15)
        // + high-value(15) + 6 user messages(15) = 80
        let info = PatientInfo {
            full_name: Some("Jane Doe".to_string()),
            phone: Some("+901234".to_string()),
            age: Some(35),
            country: Some("UK".to_string()),
            interested_treatments: vec!["hair transplant".to_string()],
            ..Default::default()
        };

        let lead = score_lead(&info, 6);
        assert_eq!(lead.score, 80);
        assert_eq!(lead.status, LeadStatus::Hot);
    }

    #[test]
    fn test_empty_profile_is_cold() {
        let lead = score_lead(&PatientInfo::default(), 0);
        assert_eq!(lead.score, 0);
        assert_eq!(lead.status, LeadStatus::Cold);
    }

    #[test]
    fn test_keyword_match_is_case_insensitive_substring() {
        let info = PatientInfo {
            interested_treatments: vec!["FUE Hair Transplant consultation".to_string()],
            ..Default::default()
        };
        // interest(15) + high-value(15)
        let lead = score_lead(&info, 0);
        assert_eq!(lead.score, 30);
    }

    #[test]
    fn test_non_high_value_interest() {
        let info = PatientInfo {
            interested_treatments: vec!["skin care".to_string()],
            ..Default::default()
        };
        let lead = score_lead(&info, 0);
        assert_eq!(lead.score, 15);
    }

    #[test]
    fn test_engagement_tiers() {
        let info = PatientInfo::default();
        assert_eq!(score_lead(&info, 1).score, 5);
        assert_eq!(score_lead(&info, 3).score, 10);
        assert_eq!(score_lead(&info, 4).score, 10);
        assert_eq!(score_lead(&info, 5).score, 15);
        assert_eq!(score_lead(&info, 10).score, 25);
        assert_eq!(score_lead(&info, 50).score, 25);
    }

    #[test]
    fn test_warm_band() {
        let info = PatientInfo {
            full_name: Some("A".to_string()),
            phone: Some("+1".to_string()),
            ..Default::default()
        };
        // 10 + 15 + engagement(15) = 40
        let lead = score_lead(&info, 5);
        assert_eq!(lead.score, 40);
        assert_eq!(lead.status, LeadStatus::Warm);
    }
}
