//! Consensus over independent polygon annotations of one frame.
//!
//! Proposals are grouped by label, validated as submitted, canonicalized, then
//! clustered greedily in a fixed processing order: each proposal joins the first
//! open cluster whose representative (first member) it overlaps with
//! IoU >= threshold, otherwise it opens a new cluster. Each cluster collapses to
//! the vertex-wise mean of its members. The result depends on processing order;
//! that order is producer id ascending, then submission order within a producer,
//! then shape order within a document.

pub mod geometry;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::annotations::{Annotation, LabeledShape};
pub use geometry::{iou, mean_polygon, Point, Polygon, POLYGON_VERTICES};

pub const DEFAULT_IOU_THRESHOLD: f64 = 0.75;

/// Merged polygon for one cluster of agreeing proposals. Computed on demand, never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsensusShape {
    pub label: String,
    pub points: Polygon,
    /// Number of proposals merged into this shape.
    pub support: usize,
}

impl LabeledShape for ConsensusShape {
    fn label(&self) -> &str {
        &self.label
    }

    fn polygon(&self) -> &Polygon {
        &self.points
    }
}

/// Label -> consensus shapes, in cluster creation order.
pub type ConsensusMap = BTreeMap<String, Vec<ConsensusShape>>;

#[derive(Clone, Copy, Debug)]
pub struct ConsensusEngine {
    iou_threshold: f64,
}

impl Default for ConsensusEngine {
    fn default() -> Self {
        Self::new(DEFAULT_IOU_THRESHOLD)
    }
}

struct Cluster {
    representative: Polygon,
    members: Vec<Polygon>,
}

impl ConsensusEngine {
    pub fn new(iou_threshold: f64) -> Self {
        Self { iou_threshold }
    }

    pub fn iou_threshold(&self) -> f64 {
        self.iou_threshold
    }

    /// Merge all annotations of one frame. Any invalid polygon fails the whole
    /// computation.
    pub fn compute(&self, annotations: &[Annotation]) -> Result<ConsensusMap> {
        let grouped = group_by_label(annotations);

        let mut out = ConsensusMap::new();
        for (label, proposals) in grouped {
            let shapes = self
                .cluster_label(&label, &proposals)
                .with_context(|| format!("consensus for label '{}'", label))?;
            log::debug!(
                "label '{}': {} proposals -> {} consensus shapes",
                label,
                proposals.len(),
                shapes.len()
            );
            out.insert(label, shapes);
        }
        Ok(out)
    }

    /// Greedy single-pass clustering of one label's proposals, in the order given.
    pub fn cluster_label(&self, label: &str, proposals: &[Polygon]) -> Result<Vec<ConsensusShape>> {
        let mut clusters: Vec<Cluster> = Vec::new();
        for proposal in proposals {
            proposal.validate()?;
            let canonical = proposal.canonicalize();

            let mut joined = false;
            for cluster in clusters.iter_mut() {
                if iou(&cluster.representative, &canonical)? >= self.iou_threshold {
                    cluster.members.push(canonical);
                    joined = true;
                    break;
                }
            }
            if !joined {
                clusters.push(Cluster {
                    representative: canonical,
                    members: vec![canonical],
                });
            }
        }

        Ok(clusters
            .into_iter()
            .filter_map(|cluster| {
                mean_polygon(&cluster.members).map(|points| ConsensusShape {
                    label: label.to_string(),
                    points,
                    support: cluster.members.len(),
                })
            })
            .collect())
    }
}

/// Collects every proposal per label in processing order.
fn group_by_label(annotations: &[Annotation]) -> BTreeMap<String, Vec<Polygon>> {
    let mut ordered: Vec<&Annotation> = annotations.iter().collect();
    // Stable: submissions from the same producer keep their arrival order.
    ordered.sort_by(|a, b| a.producer.cmp(&b.producer));

    let mut grouped: BTreeMap<String, Vec<Polygon>> = BTreeMap::new();
    for annotation in ordered {
        for shape in &annotation.shapes {
            grouped
                .entry(shape.label().to_string())
                .or_default()
                .push(*shape.polygon());
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::Shape;
    use crate::error::LabelError;
    use crate::{FrameKey, VideoId};

    fn rect(x: f64, y: f64, w: f64, h: f64) -> Polygon {
        Polygon::from_coords([(x, y), (x + w, y), (x + w, y + h), (x, y + h)])
    }

    fn annotation(producer: &str, shapes: Vec<(&str, Polygon)>) -> Annotation {
        Annotation {
            frame: FrameKey {
                video_id: VideoId::parse("video").expect("video id"),
                frame_index: 0,
            },
            producer: producer.to_string(),
            shapes: shapes
                .into_iter()
                .map(|(label, points)| Shape::new(label, producer, points))
                .collect(),
        }
    }

    fn assert_polygon_close(actual: &Polygon, expected: &Polygon) {
        for (a, e) in actual.vertices().iter().zip(expected.vertices().iter()) {
            assert!(
                (a.x - e.x).abs() < 1e-9 && (a.y - e.y).abs() < 1e-9,
                "expected {:?} got {:?}",
                expected,
                actual
            );
        }
    }

    #[test]
    fn agreeing_proposals_merge_to_vertexwise_mean() -> Result<()> {
        let proposals = [
            rect(100.0, 100.0, 50.0, 50.0),
            rect(101.0, 100.0, 50.0, 50.0),
            rect(100.0, 101.0, 50.0, 50.0),
            rect(101.0, 101.0, 50.0, 50.0),
        ];
        for a in &proposals {
            for b in &proposals {
                assert!(iou(a, b)? > 0.9);
            }
        }
        let annotations: Vec<Annotation> = ["alice", "bob", "carol", "dave"]
            .iter()
            .zip(proposals.iter())
            .map(|(producer, polygon)| annotation(producer, vec![("car", *polygon)]))
            .collect();

        let result = ConsensusEngine::default().compute(&annotations)?;
        let cars = &result["car"];
        assert_eq!(cars.len(), 1);
        assert_eq!(cars[0].support, 4);
        assert_polygon_close(&cars[0].points, &rect(100.5, 100.5, 50.0, 50.0));
        Ok(())
    }

    #[test]
    fn disagreeing_proposals_stay_separate() -> Result<()> {
        let annotations = vec![
            annotation("alice", vec![("car", rect(0.0, 0.0, 10.0, 10.0))]),
            annotation("bob", vec![("car", rect(5.0, 5.0, 10.0, 10.0))]),
        ];
        let result = ConsensusEngine::default().compute(&annotations)?;
        assert_eq!(result["car"].len(), 2);
        assert!(result["car"].iter().all(|shape| shape.support == 1));
        Ok(())
    }

    #[test]
    fn labels_never_cluster_together() -> Result<()> {
        let annotations = vec![
            annotation("alice", vec![("car", rect(0.0, 0.0, 10.0, 10.0))]),
            annotation("bob", vec![("truck", rect(0.0, 0.0, 10.0, 10.0))]),
        ];
        let result = ConsensusEngine::default().compute(&annotations)?;
        assert_eq!(result.len(), 2);
        assert_eq!(result["car"][0].support, 1);
        assert_eq!(result["truck"][0].support, 1);
        Ok(())
    }

    #[test]
    fn clustering_is_greedy_and_order_dependent() -> Result<()> {
        // a~c and b~c clear the threshold, a~b does not.
        let a = rect(0.0, 0.0, 10.0, 10.0);
        let b = rect(2.0, 0.0, 10.0, 10.0);
        let c = rect(1.0, 0.0, 10.0, 10.0);
        assert!(iou(&a, &b)? < DEFAULT_IOU_THRESHOLD);
        assert!(iou(&a, &c)? >= DEFAULT_IOU_THRESHOLD);
        assert!(iou(&b, &c)? >= DEFAULT_IOU_THRESHOLD);

        let engine = ConsensusEngine::default();

        let first = engine.cluster_label("car", &[a, b, c])?;
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].support, 2);
        assert_polygon_close(&first[0].points, &rect(0.5, 0.0, 10.0, 10.0));
        assert_eq!(first[1].support, 1);
        assert_polygon_close(&first[1].points, &b);

        let second = engine.cluster_label("car", &[b, a, c])?;
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].support, 2);
        assert_polygon_close(&second[0].points, &rect(1.5, 0.0, 10.0, 10.0));
        assert_polygon_close(&second[1].points, &a);
        Ok(())
    }

    #[test]
    fn processing_order_follows_producer_id() -> Result<()> {
        let a = rect(0.0, 0.0, 10.0, 10.0);
        let b = rect(2.0, 0.0, 10.0, 10.0);
        let c = rect(1.0, 0.0, 10.0, 10.0);
        // Arrival order b, c, a; producer order puts a first.
        let annotations = vec![
            annotation("bob", vec![("car", b)]),
            annotation("carol", vec![("car", c)]),
            annotation("alice", vec![("car", a)]),
        ];
        let result = ConsensusEngine::default().compute(&annotations)?;
        let cars = &result["car"];
        assert_eq!(cars.len(), 2);
        assert_polygon_close(&cars[0].points, &rect(0.5, 0.0, 10.0, 10.0));
        assert_polygon_close(&cars[1].points, &b);
        Ok(())
    }

    #[test]
    fn vertex_order_does_not_affect_the_mean() -> Result<()> {
        let clockwise = rect(0.0, 0.0, 10.0, 10.0);
        // Counter-clockwise, starting at the bottom-right corner.
        let shuffled = Polygon::from_coords([(12.0, 12.0), (12.0, 2.0), (2.0, 2.0), (2.0, 12.0)]);
        // Overlap 64 / union 136.
        let engine = ConsensusEngine::new(0.4);
        let shapes = engine.cluster_label("car", &[clockwise, shuffled])?;
        assert_eq!(shapes.len(), 1);
        assert_polygon_close(&shapes[0].points, &rect(1.0, 1.0, 10.0, 10.0));
        Ok(())
    }

    #[test]
    fn invalid_polygon_fails_the_whole_computation() {
        let degenerate = Polygon::from_coords([(0.0, 0.0), (5.0, 0.0), (10.0, 0.0), (20.0, 0.0)]);
        let annotations = vec![
            annotation("alice", vec![("car", rect(0.0, 0.0, 10.0, 10.0))]),
            annotation("bob", vec![("car", degenerate)]),
        ];
        let err = ConsensusEngine::default().compute(&annotations).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LabelError>(),
            Some(LabelError::Geometry(_))
        ));
    }

    #[test]
    fn concave_proposals_keep_their_outline() -> Result<()> {
        let dart = Polygon::from_coords([(0.0, 0.0), (10.0, 5.0), (0.0, 10.0), (6.0, 5.5)]);
        let reclicked = Polygon::from_coords([(6.0, 5.5), (0.0, 10.0), (10.0, 5.0), (0.0, 0.0)]);

        let shapes = ConsensusEngine::default().cluster_label("car", &[dart, reclicked])?;
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].support, 2);
        assert_polygon_close(&shapes[0].points, &dart);
        assert!((shapes[0].points.area() - 20.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn self_intersecting_proposal_fails_with_geometry_error() {
        let bowtie = Polygon::from_coords([(0.0, 0.0), (10.0, 10.0), (10.0, 0.0), (0.0, 10.0)]);
        let err = ConsensusEngine::default()
            .cluster_label("car", &[rect(0.0, 0.0, 10.0, 10.0), bowtie])
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LabelError>(),
            Some(LabelError::Geometry(_))
        ));
    }

    #[test]
    fn empty_input_yields_empty_map() -> Result<()> {
        let annotations = vec![annotation("alice", vec![])];
        assert!(ConsensusEngine::default().compute(&annotations)?.is_empty());
        assert!(ConsensusEngine::default().compute(&[])?.is_empty());
        Ok(())
    }
}
