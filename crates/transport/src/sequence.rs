use crate::{
    ControlEvent, CvEvent, Event, IndexKind, MidiEvent, TeqError, TrackKind,
};

/// Maximum number of parallel event columns a track can have.
pub const MAX_COLUMNS: usize = 16;

/// A tick-indexed event grid with one or more columns of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct EventGrid<E> {
    length: usize,
    columns: Vec<Vec<E>>,
}

impl<E: Copy + Default> EventGrid<E> {
    pub fn new(length: usize, columns: usize) -> Self {
        Self {
            length,
            columns: vec![vec![E::default(); length]; columns],
        }
    }

    /// Number of ticks.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, column: usize) -> Option<&[E]> {
        self.columns.get(column).map(Vec::as_slice)
    }

    pub fn get(&self, column: usize, tick: usize) -> Option<E> {
        self.columns.get(column)?.get(tick).copied()
    }

    /// Events of every column at `tick`, in column order.
    pub fn at(&self, tick: usize) -> impl Iterator<Item = &E> + '_ {
        self.columns.iter().filter_map(move |column| column.get(tick))
    }

    pub fn set(&mut self, column: usize, tick: usize, event: E) -> Result<(), TeqError> {
        let column_count = self.columns.len();
        let length = self.length;
        let column = self
            .columns
            .get_mut(column)
            .ok_or_else(|| TeqError::out_of_range(IndexKind::Column, column, column_count))?;
        let slot = column
            .get_mut(tick)
            .ok_or_else(|| TeqError::out_of_range(IndexKind::Tick, tick, length))?;
        *slot = event;
        Ok(())
    }

    /// Grows or shrinks the number of columns. New columns are empty, dropped
    /// columns lose their events.
    pub fn resize_columns(&mut self, columns: usize) {
        let length = self.length;
        self.columns.resize_with(columns, || vec![E::default(); length]);
    }
}

/// One track's events within one pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum Sequence {
    Midi(EventGrid<MidiEvent>),
    Cv(EventGrid<CvEvent>),
    Control(EventGrid<ControlEvent>),
}

impl Sequence {
    pub fn new(kind: TrackKind, length: usize, columns: usize) -> Self {
        match kind {
            TrackKind::Midi => Sequence::Midi(EventGrid::new(length, columns)),
            TrackKind::Cv => Sequence::Cv(EventGrid::new(length, columns)),
            TrackKind::Control => Sequence::Control(EventGrid::new(length, columns)),
        }
    }

    pub fn kind(&self) -> TrackKind {
        match self {
            Sequence::Midi(_) => TrackKind::Midi,
            Sequence::Cv(_) => TrackKind::Cv,
            Sequence::Control(_) => TrackKind::Control,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Sequence::Midi(grid) => grid.len(),
            Sequence::Cv(grid) => grid.len(),
            Sequence::Control(grid) => grid.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column_count(&self) -> usize {
        match self {
            Sequence::Midi(grid) => grid.column_count(),
            Sequence::Cv(grid) => grid.column_count(),
            Sequence::Control(grid) => grid.column_count(),
        }
    }

    pub fn get(&self, column: usize, tick: usize) -> Option<Event> {
        match self {
            Sequence::Midi(grid) => grid.get(column, tick).map(Event::Midi),
            Sequence::Cv(grid) => grid.get(column, tick).map(Event::Cv),
            Sequence::Control(grid) => grid.get(column, tick).map(Event::Control),
        }
    }

    /// Stores `event`, which must belong to this sequence's family.
    pub fn set(&mut self, column: usize, tick: usize, event: Event) -> Result<(), TeqError> {
        match (self, event) {
            (Sequence::Midi(grid), Event::Midi(e)) => grid.set(column, tick, e),
            (Sequence::Cv(grid), Event::Cv(e)) => grid.set(column, tick, e),
            (Sequence::Control(grid), Event::Control(e)) => grid.set(column, tick, e),
            (sequence, event) => Err(TeqError::PatternMismatch(format!(
                "cannot store a {:?} event in a {:?} sequence",
                event.kind(),
                sequence.kind()
            ))),
        }
    }

    /// Resets the slot to the family's empty event.
    pub fn clear(&mut self, column: usize, tick: usize) -> Result<(), TeqError> {
        match self {
            Sequence::Midi(grid) => grid.set(column, tick, MidiEvent::default()),
            Sequence::Cv(grid) => grid.set(column, tick, CvEvent::default()),
            Sequence::Control(grid) => grid.set(column, tick, ControlEvent::default()),
        }
    }

    pub fn resize_columns(&mut self, columns: usize) {
        match self {
            Sequence::Midi(grid) => grid.resize_columns(columns),
            Sequence::Cv(grid) => grid.resize_columns(columns),
            Sequence::Control(grid) => grid.resize_columns(columns),
        }
    }
}
