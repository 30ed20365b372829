//! Care pathway floor and action planning
//!
//! Deterministic: the only oracle input is what the pathway and triage
//! stages already returned.

use std::collections::HashSet;

use triage_config::constants::messages;
use triage_core::{ActionPlan, Assessment, CarePathway, PathwayCategory, PathwayOrigin, Severity};

/// Raise a pathway that is weaker than the severity allows
pub fn apply_pathway_floor(mut pathway: CarePathway, severity: Severity) -> CarePathway {
    let floor = PathwayCategory::minimum_for(severity);
    if pathway.category < floor {
        tracing::warn!(
            %severity,
            proposed = %pathway.category,
            raised_to = %floor,
            "Care pathway below severity floor"
        );
        pathway.category = floor;
        pathway.origin = PathwayOrigin::Raised;
    }
    pathway
}

/// Expands a care pathway into ordered patient steps
#[derive(Debug, Clone)]
pub struct ActionPlanner {
    max_steps: usize,
    disclaimer: String,
}

impl ActionPlanner {
    pub fn new(max_steps: usize) -> Self {
        Self {
            max_steps: max_steps.max(1),
            disclaimer: messages::SAFETY_DISCLAIMER.to_string(),
        }
    }

    pub fn with_disclaimer(mut self, disclaimer: impl Into<String>) -> Self {
        self.disclaimer = disclaimer.into();
        self
    }

    pub fn disclaimer(&self) -> &str {
        &self.disclaimer
    }

    /// Build the plan. Order: primary step, pathway and assessment actions,
    /// OTC suggestions, safety netting, then the fixed disclaimer.
    pub fn plan(&self, assessment: &Assessment, pathway: &CarePathway) -> ActionPlan {
        let primary = primary_step(pathway);

        let mut closing = Vec::new();
        if pathway.category != PathwayCategory::EmergencyCall {
            closing.push(match &pathway.safety_netting {
                Some(advice) => format!("Seek care sooner if: {}", advice),
                None => "Seek urgent care if your symptoms get worse or new symptoms appear."
                    .to_string(),
            });
        }
        if assessment.needs_disclaimer {
            closing.push(messages::DIAGNOSIS_CAVEAT.to_string());
        }

        let mut extras: Vec<String> = pathway
            .specific_actions
            .iter()
            .chain(&assessment.suggested_actions)
            .cloned()
            .collect();
        if pathway.category == PathwayCategory::SelfCare && !assessment.medications.is_empty() {
            extras.push(format!(
                "Consider over-the-counter options: {}. Follow the label dosage and ask a pharmacist if unsure.",
                assessment.medications.join(", ")
            ));
        }

        let mut seen = HashSet::new();
        let mut keep = |step: &String| seen.insert(step.trim().to_lowercase());

        let mut steps = Vec::with_capacity(self.max_steps);
        if keep(&primary) {
            steps.push(primary);
        }
        let closing: Vec<String> = closing.into_iter().filter(|s| keep(s)).collect();
        let room = self.max_steps.saturating_sub(steps.len() + closing.len());
        steps.extend(
            extras
                .into_iter()
                .filter(|s| !s.trim().is_empty() && keep(s))
                .take(room),
        );
        steps.extend(closing);
        steps.truncate(self.max_steps);

        ActionPlan::new(steps, &self.disclaimer)
    }
}

fn primary_step(pathway: &CarePathway) -> String {
    match pathway.category {
        PathwayCategory::EmergencyCall => {
            "Call emergency services now or go to the nearest emergency department.".to_string()
        }
        PathwayCategory::ScheduleVisit => format!(
            "Book an appointment with a healthcare provider ({}).",
            pathway.urgency_window
        ),
        PathwayCategory::SelfCare => format!(
            "Look after yourself at home and monitor your symptoms ({}).",
            pathway.urgency_window
        ),
    }
}
