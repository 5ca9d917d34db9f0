//! Artifact export: markdown report and pretty-printed JSON.

use crate::artifact::ProposalArtifact;
use crate::conflict::Resolution;

/// Renders the artifact as a human-readable markdown report: headline
/// summary, recommendation, the proposal sections, and an appendix of any
/// conflict records.
pub fn to_markdown(artifact: &ProposalArtifact) -> String {
    let mut out = String::new();

    out.push_str(&format!("# Grant Proposal: {}\n\n", artifact.title));
    out.push_str(&format!(
        "*Run `{}`, generated {}*\n\n",
        artifact.run_id,
        artifact.generated_at.format("%Y-%m-%d %H:%M UTC")
    ));

    out.push_str("## Assessment\n\n");
    out.push_str(&format!(
        "| Quality | Novelty | Funding potential |\n\
         |---------|---------|-------------------|\n\
         | {:.1}/10 | {:.1}/10 | {} |\n\n",
        artifact.summary.quality_score,
        artifact.summary.novelty_score,
        artifact.summary.funding_potential
    ));
    out.push_str(&format!("**Recommendation:** {}\n\n", artifact.recommendation));
    if artifact.needs_review {
        out.push_str(
            "> **Needs human review.** Reviewers disagreed beyond the \
             auto-resolution threshold; see the conflict appendix.\n\n",
        );
    }

    out.push_str(&artifact.proposal.full_text);

    if !artifact.conflicts.is_empty() {
        out.push_str("\n---\n\n## Appendix: Reviewer Conflicts\n\n");
        for record in &artifact.conflicts {
            let status = match record.resolution {
                Resolution::AutoResolved => "auto-resolved",
                Resolution::Escalated => "ESCALATED",
            };
            out.push_str(&format!("### {} ({status})\n\n", record.subject));
            for competing in &record.competing {
                out.push_str(&format!(
                    "- {}: {} (confidence {:.2})\n",
                    competing.stage, competing.value, competing.confidence
                ));
            }
            if let Some(resolved) = &record.resolved {
                out.push_str(&format!("- resolved value: {resolved}\n"));
            }
            out.push('\n');
        }
    }

    out
}

/// Serializes the artifact as pretty-printed JSON.
pub fn to_json(artifact: &ProposalArtifact) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(artifact)
}
