//! Minimal DIMACS CNF loading: the smallest loader that lets the rest of
//! the system be exercised end-to-end, accepting gzip-compressed input via
//! `flate2`.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;

#[derive(Debug, thiserror::Error)]
pub enum DimacsError {
    #[error("could not open '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("malformed DIMACS input at line {line}: {message}")]
    Malformed { line: usize, message: String },
}

/// A parsed CNF instance: the declared variable count and the clause list.
/// An empty clause (`Vec::is_empty()`) means the input is trivially UNSAT
/// and callers must treat it as such rather than handing it to a solver.
#[derive(Debug, Clone, Default)]
pub struct ParsedCnf {
    pub num_vars: usize,
    pub clauses: Vec<Vec<i32>>,
}

impl ParsedCnf {
    pub fn has_empty_clause(&self) -> bool {
        self.clauses.iter().any(|c| c.is_empty())
    }
}

/// Loads a DIMACS CNF file, transparently decompressing it if its name ends
/// in `.gz`.
pub fn load_dimacs(path: &Path) -> Result<ParsedCnf, DimacsError> {
    let file = File::open(path).map_err(|source| DimacsError::Open {
        path: path.display().to_string(),
        source,
    })?;

    let reader: Box<dyn Read> = if path.extension().map_or(false, |ext| ext == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    parse_dimacs(BufReader::new(reader))
}

fn parse_dimacs<R: BufRead>(reader: R) -> Result<ParsedCnf, DimacsError> {
    let mut cnf = ParsedCnf::default();
    let mut current: Vec<i32> = Vec::new();
    let mut header_seen = false;

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|source| DimacsError::Open {
            path: "<stream>".into(),
            source,
        })?;
        let line = line.trim();

        if line.is_empty() || line.starts_with('c') {
            continue;
        }

        if line.starts_with('p') {
            let mut fields = line.split_whitespace();
            let _p = fields.next();
            let fmt = fields.next().ok_or_else(|| DimacsError::Malformed {
                line: line_no,
                message: "missing 'cnf' tag in header".into(),
            })?;
            if fmt != "cnf" {
                return Err(DimacsError::Malformed {
                    line: line_no,
                    message: format!("unsupported format '{}'", fmt),
                });
            }
            let num_vars: usize = fields
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| DimacsError::Malformed {
                    line: line_no,
                    message: "missing variable count".into(),
                })?;
            cnf.num_vars = num_vars;
            header_seen = true;
            continue;
        }

        for tok in line.split_whitespace() {
            let lit: i32 = tok.parse().map_err(|_| DimacsError::Malformed {
                line: line_no,
                message: format!("expected integer literal, got '{}'", tok),
            })?;
            if lit == 0 {
                cnf.clauses.push(std::mem::take(&mut current));
            } else {
                current.push(lit);
            }
        }
    }

    if !current.is_empty() {
        // Tolerate a missing trailing zero on the final clause.
        cnf.clauses.push(current);
    }

    if !header_seen {
        return Err(DimacsError::Malformed {
            line: 0,
            message: "missing 'p cnf <vars> <clauses>' header".into(),
        });
    }

    Ok(cnf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_formula() {
        let text = "c a comment\np cnf 2 2\n1 -2 0\n2 0\n";
        let cnf = parse_dimacs(text.as_bytes()).unwrap();
        assert_eq!(cnf.num_vars, 2);
        assert_eq!(cnf.clauses, vec![vec![1, -2], vec![2]]);
        assert!(!cnf.has_empty_clause());
    }

    #[test]
    fn detects_empty_clause() {
        let text = "p cnf 1 1\n0\n";
        let cnf = parse_dimacs(text.as_bytes()).unwrap();
        assert!(cnf.has_empty_clause());
    }

    #[test]
    fn rejects_missing_header() {
        let text = "1 2 0\n";
        assert!(parse_dimacs(text.as_bytes()).is_err());
    }
}
