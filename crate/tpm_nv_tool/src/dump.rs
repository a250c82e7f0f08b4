const BYTES_PER_LINE: usize = 16;

/// Classic hex dump: offset, 16 bytes in hex, printable ASCII.
#[must_use]
pub fn hex_dump(data: &[u8], base: usize) -> String {
    let mut out = String::new();
    for (i, line) in data.chunks(BYTES_PER_LINE).enumerate() {
        out.push_str(&format!("{:08x}  ", base + i * BYTES_PER_LINE));
        for j in 0..BYTES_PER_LINE {
            match line.get(j) {
                Some(byte) => out.push_str(&format!("{byte:02x} ")),
                None => out.push_str("   "),
            }
            if j == 7 {
                out.push(' ');
            }
        }
        out.push_str(" |");
        out.extend(line.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[], 0), "");
        assert_eq!(
            hex_dump(b"AB\x00", 0x10),
            "00000010  41 42 00                                          |AB.|\n"
        );

        let dump = hex_dump(&[0x61; 17], 0);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00000000  61 61"));
        assert!(lines[1].starts_with("00000010  61 "));
        assert!(lines[0].ends_with("|aaaaaaaaaaaaaaaa|"));
    }
}
