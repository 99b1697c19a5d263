use crate::detector::BoundingBox;
use ndarray::Array2;

/// Cost assigned to padding cells of the square assignment problem.
const UNREACHABLE: f64 = 1e6;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// `1 - IoU` between every track box (rows) and detection box (columns).
pub fn iou_distance(tracks: &[BoundingBox], detections: &[BoundingBox]) -> Array2<f64> {
    Array2::from_shape_fn((tracks.len(), detections.len()), |(t, d)| {
        1.0 - tracks[t].iou(&detections[d]) as f64
    })
}

/// Folds detection confidence into an IoU distance matrix.
pub fn fuse_score(cost: &mut Array2<f64>, scores: &[f32]) {
    for ((_, d), value) in cost.indexed_iter_mut() {
        *value = 1.0 - (1.0 - *value) * scores[d] as f64;
    }
}

/// Minimum-cost assignment; pairs costing more than `threshold` stay
/// unmatched.
pub fn linear_assignment(cost: &Array2<f64>, threshold: f64) -> Assignment {
    let (rows, cols) = cost.dim();
    if rows == 0 || cols == 0 {
        return Assignment {
            matches: Vec::new(),
            unmatched_tracks: (0..rows).collect(),
            unmatched_detections: (0..cols).collect(),
        };
    }

    let size = rows.max(cols);
    let mut padded = Array2::from_elem((size, size), UNREACHABLE);
    padded.slice_mut(ndarray::s![..rows, ..cols]).assign(cost);

    let row_to_col = match lapjv::lapjv(&padded) {
        Ok((row_to_col, _)) => row_to_col,
        Err(e) => {
            tracing::warn!("Track assignment failed, leaving frame unmatched: {:?}", e);
            return Assignment {
                matches: Vec::new(),
                unmatched_tracks: (0..rows).collect(),
                unmatched_detections: (0..cols).collect(),
            };
        }
    };

    let mut assignment = Assignment::default();
    let mut detection_matched = vec![false; cols];
    for (row, &col) in row_to_col.iter().enumerate().take(rows) {
        if col < cols && cost[[row, col]] <= threshold {
            assignment.matches.push((row, col));
            detection_matched[col] = true;
        } else {
            assignment.unmatched_tracks.push(row);
        }
    }
    assignment.unmatched_detections = detection_matched
        .iter()
        .enumerate()
        .filter(|(_, matched)| !**matched)
        .map(|(col, _)| col)
        .collect();

    assignment
}
