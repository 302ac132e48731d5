//! Built-in reviewer personas.
//!
//! A persona is a reusable description of an expert viewpoint. Turning one
//! into a [`WorkerProfile`] binds it to the material it should review.

use crate::profile::{ContextPayload, WorkerProfile};

/// An expert viewpoint a worker can adopt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    pub role: String,
    pub expertise: String,
    pub focus_areas: Vec<String>,
    pub perspective: String,
}

impl Persona {
    pub fn new(role: &str, expertise: &str, focus_areas: &[&str], perspective: &str) -> Self {
        Self {
            role: role.to_string(),
            expertise: expertise.to_string(),
            focus_areas: focus_areas.iter().map(|s| s.to_string()).collect(),
            perspective: perspective.to_string(),
        }
    }

    /// Capability text handed to the planner when it writes this persona's instruction.
    pub fn capability_description(&self) -> String {
        format!(
            "Role: {}\nExpertise: {}\nPerspective: {}",
            self.role, self.expertise, self.perspective
        )
    }

    pub fn into_profile(self, identity: &str, context: ContextPayload) -> WorkerProfile {
        WorkerProfile::new(identity, self.capability_description(), context)
            .with_focus_tags(self.focus_areas)
    }
}

/// The four-seat review panel used for product requirement documents.
///
/// Returned as `(identity, persona)` pairs in a stable order.
pub fn standard_panel() -> Vec<(&'static str, Persona)> {
    vec![
        (
            "product_manager",
            Persona::new(
                "Product Manager",
                "Product strategy, market analysis, and feature prioritization",
                &[
                    "Business value",
                    "Market fit",
                    "Feature prioritization",
                    "Success metrics",
                ],
                "Strategic product development and market success",
            ),
        ),
        (
            "ux_designer",
            Persona::new(
                "UX Designer",
                "User experience, interface design, and user research",
                &[
                    "User flows",
                    "Interface design",
                    "Accessibility",
                    "User research needs",
                ],
                "User-centered design and experience optimization",
            ),
        ),
        (
            "marketing",
            Persona::new(
                "Marketing Specialist",
                "Market positioning, messaging, and go-to-market strategy",
                &[
                    "Value proposition",
                    "Market positioning",
                    "Target audience",
                    "Competitive advantage",
                ],
                "Market communication and product positioning",
            ),
        ),
        (
            "engineer",
            Persona::new(
                "Software Engineer",
                "Technical implementation, system architecture, and feasibility",
                &[
                    "Technical feasibility",
                    "System architecture",
                    "Performance requirements",
                    "Integration needs",
                ],
                "Technical implementation and system design",
            ),
        ),
    ]
}

/// Bind every persona of the standard panel to the same document.
pub fn standard_panel_profiles(document: &str) -> Vec<WorkerProfile> {
    standard_panel()
        .into_iter()
        .map(|(id, persona)| persona.into_profile(id, ContextPayload::text(document)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_panel_has_four_unique_seats() {
        let panel = standard_panel();
        assert_eq!(panel.len(), 4);
        let ids: std::collections::HashSet<_> = panel.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn test_persona_profile_carries_focus_areas_as_tags() {
        let profiles = standard_panel_profiles("PRD body");
        let ux = profiles
            .iter()
            .find(|p| p.identity() == "ux_designer")
            .unwrap();
        assert!(ux.focus_tags().contains(&"Accessibility".to_string()));
        assert!(ux.capability_description().contains("UX Designer"));
        assert_eq!(ux.context(), &ContextPayload::text("PRD body"));
    }
}
