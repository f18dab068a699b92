//! Overflow threshold arithmetic and overflow-chain assembly.

use crate::error::{Error, ErrorContext, Result};
use crate::page::PageSource;

/// Whether the cell lives on a table-leaf page or an index page; the
/// inline-payload threshold formula differs between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    TableLeaf,
    Index,
}

/// Number of payload bytes (`P`) stored inline before the rest spills to an
/// overflow chain, per the `U`/`X`/`M`/`K` formula in
pub fn local_payload_size(usable_page_size: u32, payload_size: i64, kind: CellKind) -> usize {
    let u = usable_page_size as i64;
    let p = payload_size;
    let x = match kind {
        CellKind::TableLeaf => u - 35,
        CellKind::Index => ((u - 12) * 64 / 255) - 23,
    };
    if p <= x {
        return p as usize;
    }
    let m = ((u - 12) * 32 / 255) - 23;
    let k = m + (p - m) % (u - 4);
    if k <= x {
        k as usize
    } else {
        m as usize
    }
}

/// Maximum number of pages an overflow chain may span before it is
/// considered a corrupt (cyclic) chain -- bounded at `usable_page_size`
/// pages per's cyclic-ownership note.
fn max_chain_pages(usable_page_size: u32) -> usize {
    usable_page_size as usize
}

/// Walks an overflow chain starting at `first_page`, appending every page's
/// payload bytes (after its 4-byte next-pointer) to `inline_prefix`, until
/// `remaining` bytes have been collected or the chain terminates/cycles.
pub fn assemble<S: PageSource>(
    pager: &mut crate::page::Pager<S>,
    inline_prefix: &[u8],
    mut remaining: usize,
    first_page: u32,
) -> Result<Vec<u8>> {
    let op = "assemble overflow chain";
    let mut out = inline_prefix.to_vec();
    let usable = pager.header().usable_page_size();
    let per_page = usable as usize - 4;
    let max_pages = max_chain_pages(usable);

    let mut page_number = first_page;
    let mut visited = std::collections::HashSet::new();
    let mut pages_walked = 0;
    while remaining > 0 {
        if page_number == 0 {
            return Err(Error::corrupt_page("overflow chain ended early", ErrorContext::new(op)));
        }
        if !visited.insert(page_number) || pages_walked >= max_pages {
            return Err(Error::corrupt_page("overflow chain cycle detected", ErrorContext::new(op).at_page(page_number)));
        }
        pages_walked += 1;
        let page = pager.read(page_number)?;
        if page.len() < 4 {
            return Err(Error::corrupt_page("overflow page too short for next-pointer", ErrorContext::new(op).at_page(page_number)));
        }
        let next = u32::from_be_bytes(page[0..4].try_into().unwrap());
        let take = remaining.min(per_page).min(page.len() - 4);
        out.extend_from_slice(&page[4..4 + take]);
        remaining -= take;
        page_number = next;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_boundary_is_fully_inline() {
        // Spec example: page size 4096, reserved 0 -> usable 4096.
        // X = 4096 - 35 = 4061; a payload of exactly 4061 bytes fits inline.
        assert_eq!(local_payload_size(4096, 4061, CellKind::TableLeaf), 4061);
    }

    #[test]
    fn one_byte_over_boundary_spills_to_m() {
        // 4062 bytes overflows; K formula yields M = ((4096-12)*32/255)-23 = 489
        let local = local_payload_size(4096, 4062, CellKind::TableLeaf);
        assert_eq!(local, 489);
    }
}
