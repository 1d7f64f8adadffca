use std::collections::HashSet;

use crate::ocr::{Direction, overlap_ratio};

use super::{ClassifiedFragment, FuriganaConfig};

/// A base fragment and at most one reading attached to it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnotationUnit<'a> {
    pub base: &'a ClassifiedFragment,
    pub reading: Option<&'a ClassifiedFragment>,
}

/// Groups one page of classified fragments into annotation units.
///
/// Candidates are visited in detection order and take the closest eligible
/// base that no earlier candidate consumed. Units come back ordered by the
/// detection index of their base.
pub fn pair_fragments<'a>(
    fragments: &'a [ClassifiedFragment],
    config: &FuriganaConfig,
) -> Vec<AnnotationUnit<'a>> {
    let mut consumed: HashSet<usize> = HashSet::new();
    let mut readings: Vec<Option<&'a ClassifiedFragment>> = vec![None; fragments.len()];
    let mut unpaired: HashSet<usize> = HashSet::new();

    for (candidate_pos, candidate) in fragments.iter().enumerate() {
        if !candidate.is_furigana {
            continue;
        }
        match best_base(candidate, fragments, &consumed, config) {
            Some(base_pos) => {
                consumed.insert(base_pos);
                readings[base_pos] = Some(candidate);
            }
            None => {
                unpaired.insert(candidate_pos);
            }
        }
    }

    let mut units: Vec<AnnotationUnit<'a>> = fragments
        .iter()
        .enumerate()
        .filter(|(pos, item)| {
            !item.is_furigana || (config.keep_unpaired && unpaired.contains(pos))
        })
        .map(|(pos, item)| AnnotationUnit {
            base: item,
            reading: readings[pos],
        })
        .collect();
    units.sort_by_key(|unit| unit.base.index);
    units
}

fn best_base(
    candidate: &ClassifiedFragment,
    fragments: &[ClassifiedFragment],
    consumed: &HashSet<usize>,
    config: &FuriganaConfig,
) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (pos, other) in fragments.iter().enumerate() {
        if other.is_furigana || consumed.contains(&pos) {
            continue;
        }
        let Some(distance) = adjacency(candidate, other, config) else {
            continue;
        };
        let closer = match best {
            Some((_, best_distance)) => distance < best_distance,
            None => true,
        };
        if closer {
            best = Some((pos, distance));
        }
    }
    best.map(|(pos, _)| pos)
}

/// Distance to `other` when it qualifies as the candidate's base.
fn adjacency(
    candidate: &ClassifiedFragment,
    other: &ClassifiedFragment,
    config: &FuriganaConfig,
) -> Option<f32> {
    let c = &candidate.rect;
    let o = &other.rect;
    let (distance, ratio, max_distance) = match candidate.direction() {
        Direction::Vertical => (
            (o.x1 - c.x1).abs(),
            overlap_ratio(c.y1, c.y2, o.y1, o.y2),
            config.vertical_max_distance,
        ),
        Direction::Horizontal => (
            (o.y1 - c.y1).abs(),
            overlap_ratio(c.x1, c.x2, o.x1, o.x2),
            config.horizontal_max_distance,
        ),
    };
    (distance < max_distance && ratio > config.min_overlap_ratio).then_some(distance)
}
