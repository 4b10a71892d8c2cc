//! Planner/compiler: expands one idea into N rule-compliant prompts.
//!
//! Scene labels come from a [`ScenePlanner`]; everything else here is
//! deterministic. Every compiled prompt embeds the product's hard rules
//! (two-tone line art, audience banding, margin-safe single-scene
//! composition), and composition types are distributed with a hard
//! no-more-than-two-consecutive-identical guarantee.

use crate::error::PipelineError;
use crate::model::{Audience, CompiledSpec, Composition};
use crate::services::scenes::{SceneError, ScenePlanner};

/// Hard rules embedded verbatim in every compiled prompt. These are
/// product rules, not stylistic suggestions.
const PROMPT_RULES: &str = "pure black-and-white line art, no shading, no gradients, no textures, \
     clean closed outlines, all elements kept well inside a generous safe margin, \
     single scene only";

/// Baseline negative constraints for every item.
const NEGATIVE_BASELINE: &str =
    "color, shading, gradient, texture, crosshatching, photorealism, text, watermark, frame, border";

/// Approximate target distribution of composition types, in percent.
/// Order matters: ties in the largest-remainder split resolve in this
/// order.
const TARGETS: [(Composition, u32); 5] = [
    (Composition::FullBody, 30),
    (Composition::CloseUp, 20),
    (Composition::Action, 20),
    (Composition::Environment, 20),
    (Composition::Pattern, 10),
];

/// Inputs for planning one job's worth of pages.
#[derive(Debug, Clone)]
pub struct PlanRequest<'a> {
    pub idea: &'a str,
    pub count: usize,
    pub audience: Audience,
    /// Recurring character description, repeated verbatim across items.
    pub hero_description: Option<&'a str>,
    /// Optional style-anchor description carried into every prompt.
    pub style_anchor: Option<&'a str>,
}

/// Produce exactly `req.count` compiled specs.
///
/// A safety rejection from the scene planner surfaces as
/// [`PipelineError::SafetyRejected`]; any other planning failure as
/// [`PipelineError::Planning`]. The orchestrator treats both as fatal for
/// the job but renders them differently.
pub async fn plan(
    scenes: &dyn ScenePlanner,
    req: &PlanRequest<'_>,
) -> Result<Vec<CompiledSpec>, PipelineError> {
    if req.count == 0 {
        return Ok(Vec::new());
    }

    let mut labels = scenes
        .scenes(req.idea, req.count, req.audience)
        .await
        .map_err(|e| match e {
            SceneError::SafetyRejected { reason } => PipelineError::SafetyRejected(reason),
            SceneError::Failed(msg) => PipelineError::Planning(msg),
        })?;

    // Exactly one spec per pending item, whatever the planner returned.
    labels.truncate(req.count);
    while labels.len() < req.count {
        let n = labels.len() + 1;
        labels.push(format!("{} in scene {n}", req.idea.trim()));
    }

    let compositions = composition_sequence(req.count);
    let specs = labels
        .into_iter()
        .zip(compositions)
        .map(|(scene, composition)| {
            let prompt = compile_prompt(&scene, composition, req);
            CompiledSpec {
                scene,
                composition,
                prompt,
                negative_prompt: NEGATIVE_BASELINE.to_string(),
            }
        })
        .collect();
    Ok(specs)
}

/// The single compiled spec for a hero reference sheet.
pub fn hero_sheet_spec(description: &str, audience: Audience) -> CompiledSpec {
    let prompt = format!(
        "character reference sheet of {description}, full body, neutral standing pose, \
         front view. {PROMPT_RULES}. {}",
        audience.style_band()
    );
    CompiledSpec {
        scene: format!("reference sheet: {description}"),
        composition: Composition::FullBody,
        prompt,
        negative_prompt: NEGATIVE_BASELINE.to_string(),
    }
}

fn compile_prompt(scene: &str, composition: Composition, req: &PlanRequest<'_>) -> String {
    let mut prompt = format!(
        "{composition} coloring page of {scene}. {PROMPT_RULES}. {}",
        req.audience.style_band()
    );
    // The recurring character is repeated verbatim on every non-pattern
    // page; pattern pages are abstract and carry no character.
    if let Some(hero) = req.hero_description
        && composition != Composition::Pattern
    {
        prompt.push_str(&format!(
            ". featuring {hero}, with this character's proportions held exactly constant"
        ));
    }
    if let Some(anchor) = req.style_anchor {
        prompt.push_str(&format!(". drawn in the style of {anchor}"));
    }
    prompt
}

/// Distribute composition types over `count` slots.
///
/// Quotas come from [`TARGETS`] by largest remainder; the first slot is
/// always a full-body composition (the strongest, most representative
/// framing); and no type ever appears three times in a row.
pub fn composition_sequence(count: usize) -> Vec<Composition> {
    let mut quotas = quotas_for(count);

    let mut seq: Vec<Composition> = Vec::with_capacity(count);
    for i in 0..count {
        let pick = if i == 0 {
            Composition::FullBody
        } else {
            pick_next(&quotas, &seq)
        };
        if let Some(q) = quotas.iter_mut().find(|(c, _)| *c == pick) {
            q.1 = q.1.saturating_sub(1);
        }
        seq.push(pick);
    }

    enforce_variety(&mut seq);
    seq
}

fn quotas_for(count: usize) -> Vec<(Composition, usize)> {
    let mut quotas: Vec<(Composition, usize, u32)> = TARGETS
        .iter()
        .map(|&(c, pct)| {
            let exact = count as u32 * pct;
            (c, (exact / 100) as usize, exact % 100)
        })
        .collect();

    let assigned: usize = quotas.iter().map(|(_, q, _)| q).sum();
    let mut remainder = count - assigned;
    // Largest fractional part first; TARGETS order breaks ties.
    let mut order: Vec<usize> = (0..quotas.len()).collect();
    order.sort_by(|&a, &b| quotas[b].2.cmp(&quotas[a].2));
    let mut idx = 0;
    while remainder > 0 {
        quotas[order[idx % order.len()]].1 += 1;
        remainder -= 1;
        idx += 1;
    }

    // The first slot is always full-body, so it must hold quota.
    if count > 0 && quotas[0].1 == 0 {
        if let Some(donor) = quotas.iter_mut().skip(1).max_by_key(|(_, q, _)| *q)
            && donor.1 > 0
        {
            donor.1 -= 1;
        }
        quotas[0].1 += 1;
    }

    quotas.into_iter().map(|(c, q, _)| (c, q)).collect()
}

/// Greedy: the type with the most remaining quota that would not create a
/// three-in-a-row run.
fn pick_next(quotas: &[(Composition, usize)], seq: &[Composition]) -> Composition {
    let run_tag = match seq {
        [.., a, b] if a == b => Some(*a),
        _ => None,
    };

    quotas
        .iter()
        .filter(|(c, q)| *q > 0 && Some(*c) != run_tag)
        .max_by_key(|(_, q)| *q)
        .or_else(|| quotas.iter().filter(|(_, q)| *q > 0).max_by_key(|(_, q)| *q))
        .map(|(c, _)| *c)
        .unwrap_or(Composition::FullBody)
}

/// Hard post-check: rewrite any third-in-a-row repeat.
fn enforce_variety(seq: &mut [Composition]) {
    for i in 2..seq.len() {
        if seq[i] == seq[i - 1] && seq[i] == seq[i - 2] {
            if let Some(j) = (i + 1..seq.len()).find(|&j| seq[j] != seq[i]) {
                seq.swap(i, j);
            } else {
                seq[i] = if seq[i] == Composition::FullBody {
                    Composition::CloseUp
                } else {
                    Composition::FullBody
                };
            }
        }
    }
}
