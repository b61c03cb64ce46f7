//! Parallel move resolution.
//!
//! Phi inputs are copied into phi locations at the end of each predecessor.
//! The copies happen "at once": a destination may also be the source of
//! another copy. [`ParallelMove::resolve`] orders them so no source is
//! overwritten before it was read, and breaks cycles through a temporary
//! register.

use crate::backend::{codegen::OperandSize, Location};

/// One copy of a parallel move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    /// Where the value is read.
    pub source: Location,
    /// Where it is written.
    pub destination: Location,
    /// Width of the value.
    pub size: OperandSize,
}

/// A set of copies that semantically happen simultaneously.
#[derive(Debug, Clone, Default)]
pub struct ParallelMove {
    moves: Vec<Move>,
}

impl ParallelMove {
    /// Adds a copy. Copies onto themselves and copies without a destination
    /// are dropped.
    pub fn add(&mut self, source: Location, destination: Location, size: OperandSize) {
        if source == destination || destination == Location::Unallocated {
            return;
        }
        assert!(
            !matches!(destination, Location::Constant(_)),
            "parallel move into constant {destination}"
        );
        self.moves.push(Move {
            source,
            destination,
            size,
        });
    }

    /// `true` if nothing needs copying.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Orders the copies for sequential execution, using `temp` to break
    /// cycles. `temp` must not appear in any copy.
    #[must_use]
    pub fn resolve(self, temp: Location) -> Vec<Move> {
        let mut pending = self.moves;
        let mut ordered = Vec::with_capacity(pending.len() + 1);
        while !pending.is_empty() {
            let ready = (0..pending.len()).find(|&index| {
                let destination = pending[index].destination;
                pending
                    .iter()
                    .enumerate()
                    .all(|(other, m)| other == index || m.source != destination)
            });
            match ready {
                Some(index) => ordered.push(pending.remove(index)),
                None => {
                    // Every remaining copy is part of a cycle.
                    let blocked = &mut pending[0];
                    ordered.push(Move {
                        source: blocked.source,
                        destination: temp,
                        size: blocked.size,
                    });
                    blocked.source = temp;
                }
            }
        }
        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Register;

    fn reg(n: u8) -> Location {
        Location::Register(Register(n))
    }

    fn simulate(moves: &[Move], state: &mut std::collections::HashMap<Location, i64>) {
        for m in moves {
            let value = match m.source {
                Location::Constant(value) => value,
                source => state[&source],
            };
            state.insert(m.destination, value);
        }
    }

    #[test]
    fn chains_are_ordered_back_to_front() {
        let mut parallel = ParallelMove::default();
        parallel.add(reg(1), reg(2), OperandSize::Word);
        parallel.add(reg(0), reg(1), OperandSize::Word);
        let ordered = parallel.resolve(reg(9));
        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[0].destination, reg(2));
    }

    #[test]
    fn swaps_go_through_the_temporary() {
        let mut parallel = ParallelMove::default();
        parallel.add(reg(0), reg(1), OperandSize::Word);
        parallel.add(reg(1), Location::StackSlot(0), OperandSize::Word);
        parallel.add(Location::StackSlot(0), reg(0), OperandSize::Word);
        parallel.add(Location::Constant(7), reg(3), OperandSize::Word);
        let ordered = parallel.resolve(reg(9));

        let mut state = std::collections::HashMap::from([
            (reg(0), 10),
            (reg(1), 11),
            (Location::StackSlot(0), 12),
        ]);
        simulate(&ordered, &mut state);
        assert_eq!(state[&reg(1)], 10);
        assert_eq!(state[&Location::StackSlot(0)], 11);
        assert_eq!(state[&reg(0)], 12);
        assert_eq!(state[&reg(3)], 7);
        assert_eq!(ordered.iter().filter(|m| m.destination == reg(9)).count(), 1);
    }

    #[test]
    fn self_moves_vanish() {
        let mut parallel = ParallelMove::default();
        parallel.add(reg(4), reg(4), OperandSize::DoubleWord);
        assert!(parallel.is_empty());
    }
}
