#[cfg(test)]
mod tests {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    fn fnv1a64(mut h: u64, bytes: &[u8]) -> u64 {
        for b in bytes {
            h ^= *b as u64;
            h = h.wrapping_mul(FNV_PRIME);
        }
        h
    }

    macro_rules! hash_isa {
          (
              $( $(#[$doc:meta])* $name:ident = $opcode:expr, $mnemonic:literal, $builder:ident => [ $( $field:ident : $kind:ident ),* $(,)? ] ),* $(,)?
          ) => {{
              let mut h = FNV_OFFSET;
              $(
                  h = fnv1a64(h, &[crate::virtual_machine::isa::Instruction::$name as u8]);
                  h = fnv1a64(h, $mnemonic.as_bytes());
                  $( h = fnv1a64(h, stringify!($kind).as_bytes()); )*
              )*
              h
          }};
      }

    /// Opcode bytes, mnemonics and operand layouts as fixed by compiled images.
    const IMAGE_FORMAT: &[(u8, &str, &[&str])] = &[
        (0x00, "NOOP", &[]),
        (0x01, "POP", &[]),
        (0x02, "POPS", &[]),
        (0x03, "POPL", &[]),
        (0x04, "POPV", &[]),
        (0x05, "POPQ", &[]),
        (0x06, "POPARG", &["I32"]),
        (0x07, "POPIP", &[]),
        (0x08, "POPBP", &[]),
        (0x09, "POPSP", &[]),
        (0x0a, "POPSLR", &[]),
        (0x20, "DUP", &[]),
        (0x21, "DUPS", &[]),
        (0x22, "DUPL", &[]),
        (0x23, "DUPV", &[]),
        (0x24, "DUPQ", &[]),
        (0x30, "STORE", &["I32"]),
        (0x31, "STORES", &["I32"]),
        (0x32, "STOREL", &["I32"]),
        (0x33, "STOREV", &["I32"]),
        (0x34, "STOREQ", &["I32"]),
        (0x35, "STOREG", &["I32"]),
        (0x36, "STOREGS", &["I32"]),
        (0x37, "STOREGL", &["I32"]),
        (0x38, "STOREGV", &["I32"]),
        (0x39, "STOREGQ", &["I32"]),
        (0x3a, "LOADP", &["I32"]),
        (0x3b, "LOADSP", &["I32"]),
        (0x3c, "LOADLP", &["I32"]),
        (0x3d, "LOADVP", &["I32"]),
        (0x3e, "LOADQP", &["I32"]),
        (0x3f, "LOADGP", &["I32"]),
        (0x40, "LOADGSP", &["I32"]),
        (0x41, "LOADGLP", &["I32"]),
        (0x42, "LOADGVP", &["I32"]),
        (0x43, "LOADGQP", &["I32"]),
        (0x50, "PUSH", &["I32"]),
        (0x51, "PUSHS", &["I32"]),
        (0x52, "PUSHL", &["I32"]),
        (0x53, "PUSHV", &["I32"]),
        (0x54, "PUSHQ", &["I32"]),
        (0x55, "PUSHG", &["I32"]),
        (0x56, "PUSHGS", &["I32"]),
        (0x57, "PUSHGL", &["I32"]),
        (0x58, "PUSHGV", &["I32"]),
        (0x59, "PUSHGQ", &["I32"]),
        (0x5a, "PUSHIP", &[]),
        (0x5b, "PUSHBP", &[]),
        (0x5c, "PUSHSP", &[]),
        (0x5d, "PUSHARGB", &["U8"]),
        (0x5e, "PUSHARGI", &["I32"]),
        (0x5f, "PUSHARGF", &["F32"]),
        (0x60, "PUSHARGS", &["Str"]),
        (0x61, "PUSHARGV", &["Vec3"]),
        (0x62, "PUSHARGQ", &["Quat"]),
        (0x63, "PUSHE", &[]),
        (0x64, "PUSHEV", &[]),
        (0x65, "PUSHEQ", &[]),
        (0x66, "PUSHARGE", &["I32"]),
        (0x70, "ADD", &["Type"]),
        (0x71, "SUB", &["Type"]),
        (0x72, "MUL", &["Type"]),
        (0x73, "DIV", &["Type"]),
        (0x74, "MOD", &["Type"]),
        (0x75, "EQ", &["Type"]),
        (0x76, "NEQ", &["Type"]),
        (0x77, "LEQ", &["Type"]),
        (0x78, "GEQ", &["Type"]),
        (0x79, "LESS", &["Type"]),
        (0x7a, "GREATER", &["Type"]),
        (0x7b, "BITAND", &[]),
        (0x7c, "BITOR", &[]),
        (0x7d, "BITXOR", &[]),
        (0x7e, "BOOLAND", &[]),
        (0x7f, "BOOLOR", &[]),
        (0x80, "NEG", &["Type"]),
        (0x81, "BITNOT", &[]),
        (0x82, "BOOLNOT", &[]),
        (0x90, "JUMP", &["I32"]),
        (0x91, "JUMPIF", &["Type", "I32"]),
        (0x92, "JUMPNIF", &["Type", "I32"]),
        (0x93, "STATE", &["I32"]),
        (0x94, "CALL", &["I32"]),
        (0x95, "RETURN", &[]),
        (0xa0, "CAST", &["Type"]),
        (0xb0, "STACKTOS", &[]),
        (0xb1, "STACKTOL", &["I32"]),
        (0xc0, "PRINT", &["Type"]),
        (0xd0, "CALLLIB", &["U8"]),
        (0xd1, "CALLLIB_TWO_BYTE", &["U16"]),
        (0xe0, "SHL", &[]),
        (0xe1, "SHR", &[]),
    ];

    fn current_isa_hash() -> u64 {
        crate::for_each_instruction!(hash_isa)
    }

    fn image_format_hash() -> u64 {
        let mut h = FNV_OFFSET;
        for (opcode, mnemonic, kinds) in IMAGE_FORMAT {
            h = fnv1a64(h, &[*opcode]);
            h = fnv1a64(h, mnemonic.as_bytes());
            for kind in *kinds {
                h = fnv1a64(h, kind.as_bytes());
            }
        }
        h
    }

    #[test]
    #[ignore]
    fn print_isa_hash() {
        println!("ISA_HASH=0x{:016x}", current_isa_hash());
    }

    #[test]
    fn isa_hash_unchanged() {
        assert_eq!(current_isa_hash(), image_format_hash());
    }
}
