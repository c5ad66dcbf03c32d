use ndarray::Array2;

/// Label the 8-connected regions of a binary mask using two-pass labeling with
/// union-find.
///
/// Returns the label image (0 = background) and the number of regions.
/// Labels are numbered 1..=n in raster order of each region's first pixel.
pub fn label_regions(mask: &Array2<bool>) -> (Array2<u32>, usize) {
    let (h, w) = mask.dim();
    let mut labels = Array2::<u32>::zeros((h, w));
    if h == 0 || w == 0 {
        return (labels, 0);
    }

    // Union-find parent array. Index 0 unused; labels start at 1.
    let mut parent: Vec<u32> = vec![0];

    // Pass 1: assign provisional labels.
    for row in 0..h {
        for col in 0..w {
            if !mask[[row, col]] {
                continue;
            }

            let mut neighbors = [0u32; 4];
            if col > 0 {
                neighbors[0] = labels[[row, col - 1]];
            }
            if row > 0 {
                neighbors[1] = labels[[row - 1, col]];
                if col > 0 {
                    neighbors[2] = labels[[row - 1, col - 1]];
                }
                if col + 1 < w {
                    neighbors[3] = labels[[row - 1, col + 1]];
                }
            }

            let smallest = neighbors.iter().copied().filter(|&l| l > 0).min();
            match smallest {
                None => {
                    let label = parent.len() as u32;
                    parent.push(label);
                    labels[[row, col]] = label;
                }
                Some(label) => {
                    labels[[row, col]] = label;
                    for &other in neighbors.iter().filter(|&&l| l > 0 && l != label) {
                        union(&mut parent, label, other);
                    }
                }
            }
        }
    }

    // Pass 2: resolve roots and renumber compactly in raster order.
    let mut compact = vec![0u32; parent.len()];
    let mut count = 0u32;
    for v in labels.iter_mut() {
        if *v == 0 {
            continue;
        }
        let root = find(&parent, *v) as usize;
        if compact[root] == 0 {
            count += 1;
            compact[root] = count;
        }
        *v = compact[root];
    }

    (labels, count as usize)
}

fn find(parent: &[u32], mut x: u32) -> u32 {
    while parent[x as usize] != x {
        x = parent[x as usize];
    }
    x
}

fn union(parent: &mut [u32], a: u32, b: u32) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        // Merge larger root into smaller root to keep labels consistent.
        let (small, big) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent[big as usize] = small;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from(rows: &[&str]) -> Array2<bool> {
        let h = rows.len();
        let w = rows[0].len();
        Array2::from_shape_fn((h, w), |(r, c)| rows[r].as_bytes()[c] == b'#')
    }

    #[test]
    fn test_diagonal_pixels_are_connected() {
        let mask = mask_from(&["#..", ".#.", "..#"]);
        let (_, n) = label_regions(&mask);
        assert_eq!(n, 1);
    }

    #[test]
    fn test_u_shape_merges() {
        let mask = mask_from(&["#.#", "#.#", "###"]);
        let (labels, n) = label_regions(&mask);
        assert_eq!(n, 1);
        assert_eq!(labels[[0, 0]], labels[[0, 2]]);
    }

    #[test]
    fn test_raster_order_numbering() {
        let mask = mask_from(&["..#", "...", "#.."]);
        let (labels, n) = label_regions(&mask);
        assert_eq!(n, 2);
        assert_eq!(labels[[0, 2]], 1);
        assert_eq!(labels[[2, 0]], 2);
    }
}
