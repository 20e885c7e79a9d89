#![forbid(unsafe_code)]

//! Delta-debugging minimization of step sequences.
//!
//! Given a sequence of steps for which a failure predicate holds, removes
//! steps while the predicate keeps holding and returns a 1-minimal
//! sequence: removing any single remaining step makes the failure go away.
//!
//! # Algorithm
//!
//! 1. Split the steps into `n` chunks (starting at 2).
//! 2. Try removing each chunk; on success restart at `n = 2`.
//! 3. Otherwise try keeping only each chunk.
//! 4. Otherwise double `n`; stop once chunks are single steps.

/// Minimize `steps` while `predicate` holds.
///
/// Returns `steps` unchanged if the predicate does not hold on it.
pub fn minimize<T, F>(steps: Vec<T>, predicate: F) -> Vec<T>
where
    T: Clone,
    F: Fn(&[T]) -> bool,
{
    if !predicate(&steps) {
        return steps;
    }

    let mut current = steps;
    let mut n = 2usize;
    while current.len() >= 2 {
        let len = current.len();
        let chunk = len.div_ceil(n);
        let ranges: Vec<(usize, usize)> = (0..len)
            .step_by(chunk)
            .map(|start| (start, (start + chunk).min(len)))
            .collect();

        // Remove one chunk.
        let removed = ranges.iter().find_map(|&(start, end)| {
            let candidate: Vec<T> = current[..start]
                .iter()
                .chain(&current[end..])
                .cloned()
                .collect();
            predicate(&candidate).then_some(candidate)
        });
        if let Some(candidate) = removed {
            current = candidate;
            n = 2;
            continue;
        }

        // Keep one chunk.
        if ranges.len() > 2 {
            let kept = ranges.iter().find_map(|&(start, end)| {
                let candidate = current[start..end].to_vec();
                predicate(&candidate).then_some(candidate)
            });
            if let Some(candidate) = kept {
                current = candidate;
                n = 2;
                continue;
            }
        }

        if chunk == 1 {
            break;
        }
        n = (n * 2).min(len);
    }

    let empty: &[T] = &[];
    if current.len() == 1 && predicate(empty) {
        current.clear();
    }
    current
}
