//! B-tree cursor: the `{Unopened -> Opened -> AtCell(rowid) -> AtEnd}` state
//! machine that table and index scans are built from.

use crate::btree::cell;
use crate::btree::overflow::{self, CellKind};
use crate::error::{Error, ErrorContext, Result};
use crate::header::{BtreePageHeader, BtreePageType};
use crate::page::{PageSource, Pager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unopened,
    Opened,
    AtCell,
    AtEnd,
}

/// One stack frame: the page currently being visited, its header, and the
/// index of the cell last descended through or yielded.
struct Frame {
    page_number: u32,
    page: Vec<u8>,
    header: BtreePageHeader,
    cell_index: usize,
}

impl Frame {
    fn load<S: PageSource>(pager: &mut Pager<S>, page_number: u32) -> Result<Self> {
        let page = pager.read(page_number)?;
        let page_offset = if page_number == 1 { crate::header::DATABASE_HEADER_BYTES } else { 0 };
        let header = BtreePageHeader::parse(&page, page_offset, page_number)?;
        Ok(Frame {
            page_number,
            page,
            header,
            cell_index: 0,
        })
    }

    fn page_offset(&self) -> usize {
        if self.page_number == 1 {
            crate::header::DATABASE_HEADER_BYTES
        } else {
            0
        }
    }
}

/// A positioned traversal over a table or index b-tree rooted at one page.
/// Dispatch between the four cell shapes (table/index x leaf/interior)
/// happens via a match on the closed `BtreePageType` enum at each frame,
/// rather than an open trait object, matching the rest of the page layer's
/// jump-table style.
pub struct Cursor<'p, S: PageSource> {
    pager: &'p mut Pager<S>,
    root_page: u32,
    kind: CellKind,
    stack: Vec<Frame>,
    state: State,
    current_row_id: Option<i64>,
    current_payload: Option<Vec<u8>>,
}

impl<'p, S: PageSource> Cursor<'p, S> {
    pub fn new(pager: &'p mut Pager<S>, root_page: u32, kind: CellKind) -> Self {
        Cursor {
            pager,
            root_page,
            kind,
            stack: Vec::new(),
            state: State::Unopened,
            current_row_id: None,
            current_payload: None,
        }
    }

    pub fn row_id(&self) -> Option<i64> {
        if self.state == State::AtCell {
            self.current_row_id
        } else {
            None
        }
    }

    pub fn payload(&self) -> Option<&[u8]> {
        if self.state == State::AtCell {
            self.current_payload.as_deref()
        } else {
            None
        }
    }

    pub fn payload_size(&self) -> Option<usize> {
        self.payload().map(|p| p.len())
    }

    fn descend_leftmost(&mut self) -> Result<()> {
        loop {
            let page_number = match self.stack.last() {
                Some(frame) if frame.header.page_type.is_leaf() => return Ok(()),
                Some(frame) => {
                    let offsets = cell::cell_offsets(&frame.page, frame.page_offset(), &frame.header)?;
                    if frame.cell_index >= offsets.len() {
                        match frame.header.rightmost_pointer {
                            Some(p) => p,
                            None => return Ok(()),
                        }
                    } else {
                        let off = offsets[frame.cell_index];
                        let left_child = if frame.header.page_type == BtreePageType::InteriorTable {
                            cell::parse_table_interior_cell(&frame.page, off)?.left_child
                        } else {
                            cell::parse_index_interior_cell(&frame.page, off, 0)?.left_child
                        };
                        left_child
                    }
                }
                None => self.root_page,
            };
            let frame = Frame::load(self.pager, page_number)?;
            self.stack.push(frame);
        }
    }

    fn load_current_cell(&mut self) -> Result<()> {
        let frame = self.stack.last().expect("at a leaf frame");
        let offsets = cell::cell_offsets(&frame.page, frame.page_offset(), &frame.header)?;
        let off = offsets[frame.cell_index];
        let usable = self.pager.header().usable_page_size();
        match frame.header.page_type {
            BtreePageType::LeafTable => {
                let (payload_size, _) = cell::peek_table_leaf_cell(&frame.page, off)?;
                let real_local = overflow::local_payload_size(usable, payload_size, CellKind::TableLeaf);
                let c = cell::parse_table_leaf_cell(&frame.page, off, real_local)?;
                self.current_row_id = Some(c.row_id);
                self.current_payload = Some(match c.overflow_page {
                    None => c.inline_payload.to_vec(),
                    Some(first) => overflow::assemble(
                        self.pager,
                        c.inline_payload,
                        c.payload_size as usize - c.inline_payload.len(),
                        first,
                    )?,
                });
            }
            BtreePageType::LeafIndex => {
                let payload_size = cell::peek_index_payload_size(&frame.page, off)?;
                let real_local = overflow::local_payload_size(usable, payload_size, CellKind::Index);
                let c = cell::parse_index_leaf_cell(&frame.page, off, real_local)?;
                self.current_row_id = None;
                self.current_payload = Some(match c.overflow_page {
                    None => c.inline_payload.to_vec(),
                    Some(first) => overflow::assemble(
                        self.pager,
                        c.inline_payload,
                        c.payload_size as usize - c.inline_payload.len(),
                        first,
                    )?,
                });
            }
            _ => {
                return Err(Error::corrupt_page(
                    "interior page reached where a leaf cell was expected",
                    ErrorContext::new("read cursor cell").at_page(frame.page_number),
                ));
            }
        }
        Ok(())
    }

    /// Descend-once-then-iterate.
    pub fn move_next(&mut self) -> Result<bool> {
        match self.state {
            State::AtEnd => return Ok(false),
            State::Unopened | State::Opened => {
                self.stack.clear();
                self.descend_leftmost()?;
            }
            State::AtCell => {
                let advance_from_top = {
                    let frame = self.stack.last_mut().expect("positioned cursor has a frame");
                    frame.cell_index += 1;
                    let offsets = cell::cell_offsets(&frame.page, frame.page_offset(), &frame.header)?;
                    frame.cell_index < offsets.len()
                };
                if !advance_from_top {
                    loop {
                        self.stack.pop();
                        match self.stack.last_mut() {
                            None => {
                                self.state = State::AtEnd;
                                self.current_row_id = None;
                                self.current_payload = None;
                                return Ok(false);
                            }
                            Some(frame) => {
                                frame.cell_index += 1;
                                let offsets = cell::cell_offsets(&frame.page, frame.page_offset(), &frame.header)?;
                                let has_more = frame.cell_index < offsets.len() || frame.header.rightmost_pointer.is_some();
                                if has_more {
                                    break;
                                }
                            }
                        }
                    }
                }
                self.descend_leftmost()?;
            }
        }

        if self.stack.is_empty() {
            self.state = State::AtEnd;
            return Ok(false);
        }
        let frame = self.stack.last().unwrap();
        let offsets = cell::cell_offsets(&frame.page, frame.page_offset(), &frame.header)?;
        if frame.cell_index >= offsets.len() {
            self.state = State::AtEnd;
            return Ok(false);
        }
        self.load_current_cell()?;
        self.state = State::AtCell;
        Ok(true)
    }

    /// Walks from the root following the rule that locates `rowid` if it is
    /// present: at each interior frame, take the `left_child` of the
    /// smallest key >= `rowid`, or the rightmost pointer if every key on
    /// the frame is smaller. Every interior frame visited is pushed onto
    /// `self.stack`; the leaf the walk lands on is returned unpushed so the
    /// caller can set its `cell_index` first. `None` means the walk ran off
    /// the right edge of the tree without reaching a leaf.
    fn descend_to_candidate_leaf(&mut self, rowid: i64) -> Result<Option<Frame>> {
        self.stack.clear();
        let mut page_number = self.root_page;
        loop {
            let frame = Frame::load(self.pager, page_number)?;
            if frame.header.page_type.is_leaf() {
                return Ok(Some(frame));
            }
            let offsets = cell::cell_offsets(&frame.page, frame.page_offset(), &frame.header)?;
            let mut next_page = frame.header.rightmost_pointer;
            for &off in &offsets {
                let c = cell::parse_table_interior_cell(&frame.page, off)?;
                if c.key >= rowid {
                    next_page = Some(c.left_child);
                    break;
                }
            }
            self.stack.push(frame);
            match next_page {
                Some(p) => page_number = p,
                None => return Ok(None),
            }
        }
    }

    /// Positions the cursor at cell `found` of `frame` if present, else
    /// marks it exhausted. Shared tail of `seek` and `seek_first`.
    fn land_on_leaf(&mut self, mut frame: Frame, found: Option<usize>) -> Result<bool> {
        match found {
            Some(i) => {
                frame.cell_index = i;
                self.stack.push(frame);
                self.load_current_cell()?;
                self.state = State::AtCell;
                Ok(true)
            }
            None => {
                self.stack.push(frame);
                self.state = State::AtEnd;
                self.current_row_id = None;
                self.current_payload = None;
                Ok(false)
            }
        }
    }

    /// Linear-scans interior frames for `rowid`, descending via the
    /// smallest key >= rowid (or the rightmost pointer if none qualify);
    /// at the leaf, linear-scans cells for an exact match. Returns true iff
    /// an exact match was found.
    pub fn seek(&mut self, rowid: i64) -> Result<bool> {
        let frame = match self.descend_to_candidate_leaf(rowid)? {
            Some(frame) => frame,
            None => {
                self.state = State::AtEnd;
                return Ok(false);
            }
        };
        let offsets = cell::cell_offsets(&frame.page, frame.page_offset(), &frame.header)?;
        let mut found = None;
        for (i, &off) in offsets.iter().enumerate() {
            let (_, row_id) = cell::peek_table_leaf_cell(&frame.page, off)?;
            if row_id == rowid {
                found = Some(i);
                break;
            }
        }
        self.land_on_leaf(frame, found)
    }

    /// Seeks to the leftmost key >= `rowid` (used for index-driven
    /// traversal where an exact match is not required). Descends by the
    /// same interior rule as `seek`, which guarantees the landed-on leaf
    /// holds the smallest key >= `rowid` if one exists anywhere in the
    /// tree -- a miss on that leaf means the tree has no such key. Leaves
    /// the cursor `AtCell` on success, so `move_next` continues the scan
    /// forward from there.
    pub fn seek_first(&mut self, rowid: i64) -> Result<bool> {
        let frame = match self.descend_to_candidate_leaf(rowid)? {
            Some(frame) => frame,
            None => {
                self.state = State::AtEnd;
                return Ok(false);
            }
        };
        let offsets = cell::cell_offsets(&frame.page, frame.page_offset(), &frame.header)?;
        let mut found = None;
        for (i, &off) in offsets.iter().enumerate() {
            let (_, row_id) = cell::peek_table_leaf_cell(&frame.page, off)?;
            if row_id >= rowid {
                found = Some(i);
                break;
            }
        }
        self.land_on_leaf(frame, found)
    }
}
