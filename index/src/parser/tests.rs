#[cfg(test)]
mod test_parser {
    use pest::Parser;

    use crate::format::AddrSpace;
    use crate::parser::{
        call_hint, CallHint, EventKind, InstructionSet, LineParser, ParseParams, Rule,
        TarmacParser, TraceEvent,
    };

    fn ensure_line_parses(line: &str) {
        let parsed = LineParser::parse(Rule::record, line);
        assert!(parsed.is_ok(), "trace line failed to parse: {line}");
    }

    fn ensure_line_fails(line: &str) {
        assert!(LineParser::parse(Rule::record, line).is_err());
    }

    fn parse_all(text: &str) -> Vec<TraceEvent> {
        TarmacParser::new(text.as_bytes(), ParseParams::default())
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn grammar_accepts_record_shapes() {
        let ok_lines = [
            "10 clk ES (00008000:e3a00001) A MOV r0,#1",
            "10 ES (00008000:e3a00001) MOV r0,#1",
            "20 tic IT (0000123c:e92d4070) O EL1h_ns : PUSH {r4-r6,lr}",
            "15 clk IS (00008004:1afffffb) A BNE loop",
            "90 clk E 00000008 CPU exception",
            "R r0 11223344",
            "10 clk R cpsr 600001d3",
            "R q0 00112233:44556677:8899aabb:ccddeeff",
            "MW4 00002000 aabbccdd",
            "25 clk MR8 00002008 0807060504030201",
            "SH 2000..201f",
        ];
        for line in ok_lines {
            ensure_line_parses(line);
        }
    }

    #[test]
    fn grammar_rejects_junk() {
        let bad_lines = [
            "Tarmac trace from model X",
            "ES (00008000:e3a00001) MOV r0,#1", // instruction without time
            "R 1234 r0",
            "MW 2000 aa",
            "10 clk Q (00008000:e3a00001) MOV",
        ];
        for line in bad_lines {
            ensure_line_fails(line);
        }
    }

    #[test]
    fn events_coalesce_attached_records() {
        let trace = "\
10 clk ES (00008000:e3a00055) A MOV r0,#0x55
10 clk R r0 00000055
20 clk ES (00008004:e5810000) A STR r0,[r1]
20 clk MW4 00001000 00000055
";
        let events = parse_all(trace);
        assert_eq!(events.len(), 2);

        let first = &events[0];
        assert_eq!(first.time, 10);
        assert_eq!(first.first_line, 1);
        assert_eq!(first.line_count, 2);
        assert_eq!(first.writes.len(), 1);
        assert_eq!(first.writes[0].space, AddrSpace::Register);
        assert_eq!(first.writes[0].bytes, vec![0x55, 0, 0, 0]);
        match &first.kind {
            EventKind::Instruction { pc, iset, .. } => {
                assert_eq!(*pc, 0x8000);
                assert_eq!(*iset, InstructionSet::A32);
            }
            other => panic!("expected instruction, got {other:?}"),
        }

        let second = &events[1];
        assert_eq!(second.writes[0].space, AddrSpace::Memory);
        assert_eq!(second.writes[0].addr, 0x1000);
        assert_eq!(second.writes[0].bytes, vec![0x55, 0, 0, 0]);
    }

    #[test]
    fn byte_and_line_spans_cover_each_event() {
        let trace = "\
10 clk ES (00008000:e3a00055) A MOV r0,#0x55
10 clk R r0 00000055
20 clk ES (00008004:e1a00000) A NOP
";
        let events = parse_all(trace);
        let line1 = trace.lines().next().unwrap().len() + 1;
        let line2 = trace.lines().nth(1).unwrap().len() + 1;
        assert_eq!(events[0].pos, 0);
        assert_eq!(events[0].len, (line1 + line2) as u64);
        assert_eq!(events[1].first_line, 3);
        assert_eq!(events[1].line_count, 1);
        // The second event starts where its line starts.
        assert_eq!(events[1].pos, events[0].pos + events[0].len);
    }

    #[test]
    fn leading_junk_sets_lineno_offset() {
        let trace = "\
Fast Models trace, version 11.9
================================
10 clk ES (00008000:e1a00000) A NOP
";
        let mut parser = TarmacParser::new(trace.as_bytes(), ParseParams::default());
        let events: Vec<_> = (&mut parser).collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].first_line, 3);
        assert_eq!(parser.lineno_offset(), 2);
    }

    #[test]
    fn exception_lines_become_exception_events() {
        let events = parse_all("50 clk E 00000008 Undefined Instruction\n");
        assert_eq!(events.len(), 1);
        assert!(events[0].is_exception());
    }

    #[test]
    fn semihosting_records_attach_unknown_regions() {
        let trace = "\
100 clk ES (00008000:ef123456) A SVC 0x123456
SH 2000..201f
";
        let events = parse_all(trace);
        assert_eq!(events[0].unknown.len(), 1);
        assert_eq!(events[0].unknown[0].lo, 0x2000);
        assert_eq!(events[0].unknown[0].hi, 0x201f);
        assert_eq!(events[0].line_count, 2);
    }

    #[test]
    fn big_endian_value_decoding() {
        let trace = "\
10 clk ES (00008000:e3a00055) A MOV r0,#0x11223344
10 clk R r0 11223344
";
        let events = TarmacParser::new(
            trace.as_bytes(),
            ParseParams {
                bigend: true,
                ..Default::default()
            },
        )
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
        assert_eq!(events[0].writes[0].bytes, vec![0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn call_hints_from_disassembly() {
        assert_eq!(call_hint("BL do_thing"), CallHint::Call);
        assert_eq!(call_hint("BLNE helper"), CallHint::Call);
        assert_eq!(call_hint("BLX r3"), CallHint::Call);
        assert_eq!(call_hint("EL1h_ns : BLR x8"), CallHint::Call);
        assert_eq!(call_hint("RET"), CallHint::Return);
        assert_eq!(call_hint("BX lr"), CallHint::Return);
        assert_eq!(call_hint("POP {r4-r6,pc}"), CallHint::Return);
        assert_eq!(call_hint("MOV pc, lr"), CallHint::Return);
        // Condition-code traps: BLS is a branch, not a call.
        assert_eq!(call_hint("BLS loop"), CallHint::None);
        assert_eq!(call_hint("B elsewhere"), CallHint::None);
        assert_eq!(call_hint("MOV r0,#1"), CallHint::None);
    }
}
