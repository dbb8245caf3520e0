use crate::registry::SlaveId;

/// An idle slave able to take a batch, with its last observed throughput
/// in tasks per second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub slave: SlaveId,
    pub throughput: Option<f64>,
}

impl Candidate {
    pub fn new(slave: SlaveId, throughput: Option<f64>) -> Self {
        Self { slave, throughput }
    }

    fn known_throughput(&self) -> Option<f64> {
        self.throughput.filter(|t| t.is_finite() && *t > 0.0)
    }
}

/// Splits `remaining` pending replicas among `idle` slaves.
///
/// Each slave gets at most `batch_size` replicas and at most an even split
/// of what remains. Slaves with a known throughput are further capped by
/// their share of the combined throughput of the idle set. Slaves are
/// served in the order given and no slave gets more than what is left.
///
/// # Arguments
/// * `remaining` - The amount of replicas waiting for dispatch.
/// * `batch_size` - The largest batch a single slave may receive.
/// * `idle` - The slaves able to take work, in registration order.
///
/// # Returns
/// The non-empty shares, paired with the slave they go to.
pub fn allocate(remaining: usize, batch_size: usize, idle: &[Candidate]) -> Vec<(SlaveId, usize)> {
    if remaining == 0 || batch_size == 0 || idle.is_empty() {
        return Vec::new();
    }

    let even = remaining.div_ceil(idle.len());
    let combined: f64 = idle.iter().filter_map(Candidate::known_throughput).sum();

    let mut left = remaining;
    let mut shares = Vec::with_capacity(idle.len());

    for candidate in idle {
        if left == 0 {
            break;
        }

        let weighted = match candidate.known_throughput() {
            Some(t) => ((remaining as f64 * t / combined).ceil() as usize).max(1),
            None => even,
        };

        let share = batch_size.min(even).min(weighted).min(left);
        shares.push((candidate.slave, share));
        left -= share;
    }

    shares
}
