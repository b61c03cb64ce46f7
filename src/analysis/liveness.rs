//! SSA liveness and live intervals.
//!
//! Blocks are laid out in a linear order (the reverse post-order, so every
//! block follows its immediate dominator) and every instruction gets a
//! *lifetime position*:
//!
//! ```text
//! block start  ─ phis live here
//! +0 / +1      ─ first instruction: uses at +0, result defined at +1
//! +2 / +3      ─ second instruction
//! ...
//! block end    ─ one past the last position of the block
//! ```
//!
//! Block-level `live_in`/`live_out` sets are solved by a backward fixpoint:
//!
//! - `OUT[B]` = ∪ `IN[S]` for successors `S`, plus the inputs of `S`'s phis
//!   flowing in from `B`
//! - `IN[B]` = `GEN[B]` ∪ (`OUT[B]` − `KILL[B]`)
//!
//! Live ranges are then built per value. Ranges are half-open: a value is
//! available at `p` when `start <= p < end`. Environment uses keep the value
//! alive across the safepoint, and values live into a loop header are
//! extended to the end of the loop.
//!
//! Constants are not given intervals; the allocator leaves them in place and
//! code generation materializes them at each use.

use crate::{
    ir::{BlockId, DataType, Graph, InsnId, Instruction, InstructionKind},
    utils::BitSet,
};

/// Register file a value is allocated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterClass {
    /// General purpose registers.
    Core,
    /// Floating-point registers.
    FloatingPoint,
}

impl From<DataType> for RegisterClass {
    fn from(ty: DataType) -> Self {
        if ty.is_floating_point() {
            RegisterClass::FloatingPoint
        } else {
            RegisterClass::Core
        }
    }
}

/// A half-open span of lifetime positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveRange {
    /// First covered position.
    pub start: usize,
    /// One past the last covered position.
    pub end: usize,
}

/// Lifetime of one SSA value.
#[derive(Debug, Clone)]
pub struct LiveInterval {
    value: InsnId,
    ty: DataType,
    ranges: Vec<LiveRange>,
    uses: Vec<usize>,
    register_class: RegisterClass,
    spans_call: bool,
}

impl LiveInterval {
    fn new(value: InsnId, ty: DataType) -> Self {
        Self {
            value,
            ty,
            ranges: Vec::new(),
            uses: Vec::new(),
            register_class: RegisterClass::from(ty),
            spans_call: false,
        }
    }

    /// The value this interval describes.
    #[must_use]
    pub fn value(&self) -> InsnId {
        self.value
    }

    /// Type of the value.
    #[must_use]
    pub fn ty(&self) -> DataType {
        self.ty
    }

    /// Disjoint ranges in ascending order.
    #[must_use]
    pub fn ranges(&self) -> &[LiveRange] {
        &self.ranges
    }

    /// Positions of the instructions using the value, ascending.
    #[must_use]
    pub fn uses(&self) -> &[usize] {
        &self.uses
    }

    /// Register file hint.
    #[must_use]
    pub fn register_class(&self) -> RegisterClass {
        self.register_class
    }

    /// `true` if the value must survive a call.
    #[must_use]
    pub fn spans_call(&self) -> bool {
        self.spans_call
    }

    /// First covered position.
    #[must_use]
    pub fn start(&self) -> usize {
        self.ranges.first().map_or(0, |range| range.start)
    }

    /// One past the last covered position.
    #[must_use]
    pub fn end(&self) -> usize {
        self.ranges.last().map_or(0, |range| range.end)
    }

    /// `true` if the value is live at `position`.
    #[must_use]
    pub fn covers(&self, position: usize) -> bool {
        self.ranges
            .iter()
            .any(|range| range.start <= position && position < range.end)
    }

    /// `true` if both intervals are live at some common position.
    #[must_use]
    pub fn intersects(&self, other: &LiveInterval) -> bool {
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let (a, b) = (self.ranges[i], other.ranges[j]);
            if a.start < b.end && b.start < a.end {
                return true;
            }
            if a.end <= b.end {
                i += 1;
            } else {
                j += 1;
            }
        }
        false
    }

    fn add_range(&mut self, start: usize, end: usize) {
        if start >= end {
            return;
        }
        self.ranges.push(LiveRange { start, end });
        self.ranges.sort_unstable_by_key(|range| range.start);
        let mut merged: Vec<LiveRange> = Vec::with_capacity(self.ranges.len());
        for range in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
                _ => merged.push(range),
            }
        }
        self.ranges = merged;
    }

    fn set_from(&mut self, position: usize) {
        self.ranges.retain(|range| range.end > position);
        match self.ranges.first_mut() {
            Some(first) => first.start = first.start.max(position),
            None => self.ranges.push(LiveRange {
                start: position,
                end: position + 1,
            }),
        }
    }

    fn add_use(&mut self, position: usize) {
        self.uses.push(position);
    }
}

/// Output of [`SsaLivenessAnalysis::analyze`].
#[derive(Debug, Clone)]
pub struct LivenessResult {
    linear_order: Vec<BlockId>,
    block_ranges: Vec<(usize, usize)>,
    positions: Vec<Option<usize>>,
    intervals: Vec<LiveInterval>,
    interval_index: Vec<Option<usize>>,
    constants: Vec<(InsnId, i64)>,
    safepoints: Vec<usize>,
    live_in: Vec<BitSet>,
    live_out: Vec<BitSet>,
    max_position: usize,
}

impl LivenessResult {
    /// Blocks in layout order.
    #[must_use]
    pub fn linear_order(&self) -> &[BlockId] {
        &self.linear_order
    }

    /// `[start, end)` positions of `block`.
    #[must_use]
    pub fn block_range(&self, block: BlockId) -> (usize, usize) {
        self.block_ranges
            .get(block.index())
            .copied()
            .unwrap_or((0, 0))
    }

    /// Lifetime position of an instruction (the block start for phis).
    #[must_use]
    pub fn position(&self, insn: InsnId) -> Option<usize> {
        self.positions.get(insn.index()).copied().flatten()
    }

    /// Intervals sorted by start position.
    #[must_use]
    pub fn intervals(&self) -> &[LiveInterval] {
        &self.intervals
    }

    /// The interval of `value`, if it needs a location.
    #[must_use]
    pub fn interval(&self, value: InsnId) -> Option<&LiveInterval> {
        self.interval_index
            .get(value.index())
            .copied()
            .flatten()
            .map(|index| &self.intervals[index])
    }

    /// Constant values, which live in no register.
    #[must_use]
    pub fn constants(&self) -> &[(InsnId, i64)] {
        &self.constants
    }

    /// Positions of every safepoint, ascending.
    #[must_use]
    pub fn safepoints(&self) -> &[usize] {
        &self.safepoints
    }

    /// Values live on entry to `block`.
    #[must_use]
    pub fn live_in(&self, block: BlockId) -> &BitSet {
        &self.live_in[block.index()]
    }

    /// Values live on exit from `block`.
    #[must_use]
    pub fn live_out(&self, block: BlockId) -> &BitSet {
        &self.live_out[block.index()]
    }

    /// One past the last lifetime position.
    #[must_use]
    pub fn max_position(&self) -> usize {
        self.max_position
    }

    /// Size of the value space (the graph's instruction table).
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.positions.len()
    }
}

/// Liveness analysis over a graph in SSA form.
pub struct SsaLivenessAnalysis<'g> {
    graph: &'g Graph,
    linear_order: Vec<BlockId>,
    block_ranges: Vec<(usize, usize)>,
    positions: Vec<Option<usize>>,
}

impl<'g> SsaLivenessAnalysis<'g> {
    /// Computes linear order, lifetime positions, live sets and intervals.
    ///
    /// # Panics
    ///
    /// Panics if the graph is not in SSA form.
    #[must_use]
    pub fn analyze(graph: &'g Graph) -> LivenessResult {
        assert!(graph.in_ssa(), "liveness requires a graph in SSA form");
        let mut analysis = Self {
            graph,
            linear_order: graph.reverse_post_order(),
            block_ranges: vec![(0, 0); graph.block_capacity()],
            positions: vec![None; graph.instruction_count()],
        };
        let max_position = analysis.number_instructions();
        let (live_in, live_out) = analysis.compute_live_sets();
        let mut intervals = analysis.build_intervals(&live_in, &live_out);

        let safepoints: Vec<usize> = graph
            .instructions()
            .filter(|insn| insn.kind().is_safepoint())
            .filter_map(|insn| analysis.positions[insn.id().index()])
            .collect();
        let calls: Vec<usize> = graph
            .instructions()
            .filter(|insn| {
                matches!(
                    insn.kind(),
                    InstructionKind::Invoke { .. } | InstructionKind::SuspendCheck
                )
            })
            .filter_map(|insn| analysis.positions[insn.id().index()])
            .collect();
        for interval in &mut intervals {
            interval.spans_call = calls
                .iter()
                .any(|&call| interval.covers(call) && interval.covers(call + 1));
            interval.uses.sort_unstable();
        }
        let mut safepoints = safepoints;
        safepoints.sort_unstable();

        intervals.sort_by_key(|interval| (interval.start(), interval.value));
        let mut interval_index = vec![None; graph.instruction_count()];
        for (index, interval) in intervals.iter().enumerate() {
            interval_index[interval.value.index()] = Some(index);
        }
        let constants = graph
            .instructions()
            .filter_map(|insn| insn.kind().constant_value().map(|value| (insn.id(), value)))
            .collect();

        LivenessResult {
            linear_order: analysis.linear_order,
            block_ranges: analysis.block_ranges,
            positions: analysis.positions,
            intervals,
            interval_index,
            constants,
            safepoints,
            live_in,
            live_out,
            max_position,
        }
    }

    fn number_instructions(&mut self) -> usize {
        let mut position = 0;
        for &block in &self.linear_order {
            let start = position;
            let data = self.graph.block(block);
            for &phi in data.phis() {
                self.positions[phi.index()] = Some(start);
            }
            position += 2;
            for &id in data.instructions() {
                self.positions[id.index()] = Some(position);
                position += 2;
            }
            self.block_ranges[block.index()] = (start, position);
        }
        position
    }

    /// `true` for values that are given an interval.
    fn needs_location(insn: &Instruction) -> bool {
        insn.is_live()
            && !insn.ty().is_void()
            && insn.has_users()
            && insn.kind().constant_value().is_none()
            && !insn.is_emitted_at_use_site()
    }

    /// Values read by `insn` at its position, looking through instructions
    /// generated at their use site. Environment entries are reported with
    /// `true`.
    fn uses_of(&self, insn: &Instruction, out: &mut Vec<(InsnId, bool)>) {
        for &input in insn.inputs() {
            let def = self.graph.instruction(input);
            if def.is_emitted_at_use_site() {
                self.uses_of(def, out);
            } else if Self::needs_location(def) {
                out.push((input, false));
            }
        }
        if let Some(environment) = insn.environment() {
            for value in environment.values() {
                if Self::needs_location(self.graph.instruction(value)) {
                    out.push((value, true));
                }
            }
        }
    }

    fn phi_inputs_from(&self, block: BlockId, succ: BlockId) -> Vec<InsnId> {
        let succ = self.graph.block(succ);
        let Some(index) = succ.predecessor_index(block) else {
            return Vec::new();
        };
        succ.phis()
            .iter()
            .filter_map(|&phi| self.graph.instruction(phi).inputs().get(index).copied())
            .filter(|&input| Self::needs_location(self.graph.instruction(input)))
            .collect()
    }

    fn compute_live_sets(&self) -> (Vec<BitSet>, Vec<BitSet>) {
        let size = self.graph.instruction_count();
        let blocks = self.graph.block_capacity();
        let mut gen = vec![BitSet::new(size); blocks];
        let mut kill = vec![BitSet::new(size); blocks];
        let mut uses = Vec::new();

        for &block in &self.linear_order {
            let data = self.graph.block(block);
            for &phi in data.phis() {
                kill[block.index()].insert(phi.index());
            }
            for &id in data.instructions() {
                let insn = self.graph.instruction(id);
                uses.clear();
                self.uses_of(insn, &mut uses);
                for &(value, _) in &uses {
                    if !kill[block.index()].contains(value.index()) {
                        gen[block.index()].insert(value.index());
                    }
                }
                kill[block.index()].insert(id.index());
            }
        }

        let mut live_in = vec![BitSet::new(size); blocks];
        let mut live_out = vec![BitSet::new(size); blocks];
        let mut changed = true;
        while changed {
            changed = false;
            for &block in self.linear_order.iter().rev() {
                let mut out = BitSet::new(size);
                for &succ in self.graph.block(block).successors() {
                    out.union_with(&live_in[succ.index()]);
                    for input in self.phi_inputs_from(block, succ) {
                        out.insert(input.index());
                    }
                }
                let mut inn = out.clone();
                inn.difference_with(&kill[block.index()]);
                inn.union_with(&gen[block.index()]);

                changed |= live_out[block.index()].union_with(&out);
                changed |= live_in[block.index()].union_with(&inn);
            }
        }
        (live_in, live_out)
    }

    fn build_intervals(&self, live_in: &[BitSet], live_out: &[BitSet]) -> Vec<LiveInterval> {
        let mut intervals: Vec<Option<LiveInterval>> = vec![None; self.graph.instruction_count()];
        let mut uses = Vec::new();
        for &block in self.linear_order.iter().rev() {
            let (start, end) = self.block_ranges[block.index()];
            for value in live_out[block.index()].iter() {
                entry(&mut intervals, self.graph, InsnId::new(value)).add_range(start, end);
            }
            for &succ in self.graph.block(block).successors() {
                for input in self.phi_inputs_from(block, succ) {
                    entry(&mut intervals, self.graph, input).add_use(end.saturating_sub(2));
                }
            }

            for &id in self.graph.block(block).instructions().iter().rev() {
                let insn = self.graph.instruction(id);
                let Some(position) = self.positions[id.index()] else {
                    continue;
                };
                if Self::needs_location(insn) {
                    entry(&mut intervals, self.graph, id).set_from(position + 1);
                }
                uses.clear();
                self.uses_of(insn, &mut uses);
                for &(value, environment) in &uses {
                    let until = if environment { position + 2 } else { position + 1 };
                    let interval = entry(&mut intervals, self.graph, value);
                    interval.add_range(start, until);
                    interval.add_use(position);
                }
            }

            for &phi in self.graph.block(block).phis() {
                if Self::needs_location(self.graph.instruction(phi)) {
                    entry(&mut intervals, self.graph, phi).set_from(start);
                }
            }

            if let Some(info) = self.graph.loop_headed_by(block) {
                let loop_end = info
                    .blocks()
                    .map(|member| self.block_ranges[member.index()].1)
                    .max()
                    .unwrap_or(end);
                for value in live_in[block.index()].iter() {
                    entry(&mut intervals, self.graph, InsnId::new(value)).add_range(start, loop_end);
                }
            }
        }

        intervals.into_iter().flatten().collect()
    }
}

fn entry<'a>(
    intervals: &'a mut [Option<LiveInterval>],
    graph: &Graph,
    value: InsnId,
) -> &'a mut LiveInterval {
    let ty = graph.instruction(value).ty();
    intervals[value.index()].get_or_insert_with(|| LiveInterval::new(value, ty))
}
