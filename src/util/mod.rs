use std::fmt;

const COLUMNS: usize = 16;

/// Write a hexdump of the provided byte slice, sixteen bytes per row, with an
/// ASCII column.  Apple II text often has the high bit set, so it is masked
/// off before deciding whether a byte is printable.
pub fn hexdump(f: &mut fmt::Formatter, buffer: &[u8]) -> fmt::Result {
    if buffer.is_empty() {
        return write!(f, "{:04x}: ", 0);
    }
    for (row_index, row) in buffer.chunks(COLUMNS).enumerate() {
        if row_index > 0 {
            writeln!(f)?;
        }
        write!(f, "{:04x}: ", row_index * COLUMNS)?;
        for b in row {
            write!(f, "{:02x} ", b)?;
        }
        for _ in row.len()..COLUMNS {
            f.write_str("   ")?;
        }
        for b in row {
            let c = match *b & 0x7F {
                c @ 0x20..=0x7E => c as char,
                _ => '.',
            };
            write!(f, "{}", c)?;
        }
    }
    Ok(())
}

pub struct Hex<'a>(pub &'a [u8]);

impl<'a> fmt::Display for Hex<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        hexdump(f, self.0)
    }
}

pub fn hex(bytes: &[u8]) -> Hex {
    Hex(bytes)
}
