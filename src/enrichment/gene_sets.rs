//! GO / KEGG gene set collections

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Source database of a gene set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Ontology {
    /// GO biological process
    BP,
    /// GO molecular function
    MF,
    /// GO cellular component
    CC,
    KEGG,
}

impl FromStr for Ontology {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BP" | "GO:BP" | "BIOLOGICAL_PROCESS" => Ok(Self::BP),
            "MF" | "GO:MF" | "MOLECULAR_FUNCTION" => Ok(Self::MF),
            "CC" | "GO:CC" | "CELLULAR_COMPONENT" => Ok(Self::CC),
            "KEGG" => Ok(Self::KEGG),
            other => Err(PipelineError::InvalidGeneSets {
                reason: format!("unknown ontology '{}' (BP, MF, CC, KEGG)", other),
            }),
        }
    }
}

impl fmt::Display for Ontology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BP => "BP",
            Self::MF => "MF",
            Self::CC => "CC",
            Self::KEGG => "KEGG",
        };
        f.write_str(s)
    }
}

/// Which ontologies an analysis covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OntologyScope {
    BP,
    MF,
    CC,
    /// BP, MF and CC
    #[default]
    GO,
    KEGG,
    ALL,
}

impl OntologyScope {
    pub fn contains(&self, ontology: Ontology) -> bool {
        match self {
            Self::BP => ontology == Ontology::BP,
            Self::MF => ontology == Ontology::MF,
            Self::CC => ontology == Ontology::CC,
            Self::GO => ontology != Ontology::KEGG,
            Self::KEGG => ontology == Ontology::KEGG,
            Self::ALL => true,
        }
    }
}

impl FromStr for OntologyScope {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BP" => Ok(Self::BP),
            "MF" => Ok(Self::MF),
            "CC" => Ok(Self::CC),
            "GO" => Ok(Self::GO),
            "KEGG" => Ok(Self::KEGG),
            "ALL" => Ok(Self::ALL),
            other => Err(PipelineError::InvalidConfig {
                reason: format!("unknown ontology scope '{}' (BP, MF, CC, GO, KEGG, ALL)", other),
            }),
        }
    }
}

impl fmt::Display for OntologyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneSet {
    pub id: String,
    pub name: String,
    pub ontology: Ontology,
    /// Distinct member genes in file order
    pub genes: Vec<String>,
}

impl GeneSet {
    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }
}

/// Layout of a gene set file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneSetFormat {
    /// Long table `term_id, term_name, ontology, gene_id`, one row per
    /// membership
    #[default]
    Table,
    /// GMT: `id <tab> description <tab> gene...`
    Gmt,
}

/// One configured gene set file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneSetSource {
    pub path: PathBuf,
    #[serde(default)]
    pub format: GeneSetFormat,
    /// Ontology of every set in a GMT file; ignored for tables
    #[serde(default)]
    pub ontology: Option<Ontology>,
}

fn invalid(path: &Path, reason: impl fmt::Display) -> PipelineError {
    PipelineError::InvalidGeneSets {
        reason: format!("{}: {}", path.display(), reason),
    }
}

/// Gene sets in load order, ids unique per ontology
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneSetCollection {
    sets: Vec<GeneSet>,
}

impl GeneSetCollection {
    pub fn new(sets: Vec<GeneSet>) -> Self {
        Self { sets }
    }

    pub fn sets(&self) -> &[GeneSet] {
        &self.sets
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&GeneSet> {
        self.sets.iter().find(|s| s.id == id)
    }

    /// Append sets, merging members of sets that share id and ontology
    pub fn extend(&mut self, other: GeneSetCollection) {
        let mut index: HashMap<(String, Ontology), usize> = self
            .sets
            .iter()
            .enumerate()
            .map(|(i, s)| ((s.id.clone(), s.ontology), i))
            .collect();
        for set in other.sets {
            match index.get(&(set.id.clone(), set.ontology)) {
                Some(&i) => {
                    let target = &mut self.sets[i];
                    let seen: HashSet<String> = target.genes.iter().cloned().collect();
                    target.genes.extend(set.genes.into_iter().filter(|g| !seen.contains(g)));
                }
                None => {
                    index.insert((set.id.clone(), set.ontology), self.sets.len());
                    self.sets.push(set);
                }
            }
        }
    }

    /// Read a long annotation table (tab or comma separated, with header).
    ///
    /// Columns are located by header name (`term_id`, `term_name`,
    /// `ontology`, `gene_id`), falling back to that positional order.
    pub fn from_annotation_table<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let header_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
        let delimiter = if header_line.contains('\t') { b'\t' } else { b',' };

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .flexible(false)
            .from_reader(text.as_bytes());
        let headers = reader.headers()?.clone();
        let column = |name: &str, fallback: usize| {
            headers
                .iter()
                .position(|h| h.eq_ignore_ascii_case(name))
                .unwrap_or(fallback)
        };
        let (term_col, name_col, ont_col, gene_col) =
            (column("term_id", 0), column("term_name", 1), column("ontology", 2), column("gene_id", 3));
        if headers.len() < 4 {
            return Err(invalid(path, "annotation table needs 4 columns"));
        }

        let mut sets: Vec<GeneSet> = Vec::new();
        let mut index: HashMap<(String, Ontology), usize> = HashMap::new();
        let mut members: Vec<HashSet<String>> = Vec::new();
        for (line, row) in reader.records().enumerate() {
            let row = row?;
            let field = |col: usize| row.get(col).unwrap_or_default().to_string();
            let id = field(term_col);
            let gene = field(gene_col);
            if id.is_empty() || gene.is_empty() {
                return Err(invalid(path, format!("row {} has an empty term or gene", line + 2)));
            }
            let ontology: Ontology = field(ont_col)
                .parse()
                .map_err(|e| invalid(path, format!("row {}: {}", line + 2, e)))?;
            let slot = *index.entry((id.clone(), ontology)).or_insert_with(|| {
                sets.push(GeneSet {
                    id: id.clone(),
                    name: field(name_col),
                    ontology,
                    genes: Vec::new(),
                });
                members.push(HashSet::new());
                sets.len() - 1
            });
            if members[slot].insert(gene.clone()) {
                sets[slot].genes.push(gene);
            }
        }
        if sets.is_empty() {
            return Err(invalid(path, "no gene sets"));
        }
        log::info!("Loaded {} gene sets from {}", sets.len(), path.display());
        Ok(Self { sets })
    }

    /// Read a GMT file whose sets all belong to `ontology`
    pub fn from_gmt<P: AsRef<Path>>(path: P, ontology: Ontology) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let mut sets = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
            if fields.len() < 3 {
                return Err(invalid(path, format!("line {} has no genes", line_no + 1)));
            }
            let id = fields[0].to_string();
            let name = match fields[1] {
                "" | "na" | "NA" => id.clone(),
                desc => desc.to_string(),
            };
            let mut seen = HashSet::new();
            let genes = fields[2..]
                .iter()
                .filter(|g| !g.is_empty() && seen.insert(**g))
                .map(|g| g.to_string())
                .collect();
            sets.push(GeneSet {
                id,
                name,
                ontology,
                genes,
            });
        }
        if sets.is_empty() {
            return Err(invalid(path, "no gene sets"));
        }
        log::info!("Loaded {} {} gene sets from {}", sets.len(), ontology, path.display());
        Ok(Self { sets })
    }

    /// Load and merge every configured source
    pub fn load(sources: &[GeneSetSource]) -> Result<Self> {
        let mut all = Self::default();
        for source in sources {
            let loaded = match source.format {
                GeneSetFormat::Table => Self::from_annotation_table(&source.path)?,
                GeneSetFormat::Gmt => {
                    let ontology = source
                        .ontology
                        .ok_or_else(|| invalid(&source.path, "GMT sources need an ontology"))?;
                    Self::from_gmt(&source.path, ontology)?
                }
            };
            all.extend(loaded);
        }
        Ok(all)
    }

    /// Sets in `scope` with their genes cut down to `universe`, keeping
    /// those whose size lands in `[min_size, max_size]`
    pub fn restrict(&self, scope: OntologyScope, universe: &HashSet<&str>, min_size: usize, max_size: usize) -> Self {
        let sets: Vec<GeneSet> = self
            .sets
            .iter()
            .filter(|s| scope.contains(s.ontology))
            .filter_map(|s| {
                let genes: Vec<String> = s
                    .genes
                    .iter()
                    .filter(|g| universe.contains(g.as_str()))
                    .cloned()
                    .collect();
                (genes.len() >= min_size && genes.len() <= max_size).then(|| GeneSet {
                    genes,
                    ..s.clone()
                })
            })
            .collect();
        log::debug!(
            "{} of {} gene sets in scope {} with {}..={} genes",
            sets.len(),
            self.sets.len(),
            scope,
            min_size,
            max_size
        );
        Self { sets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    fn set(id: &str, ontology: Ontology, genes: &[&str]) -> GeneSet {
        GeneSet {
            id: id.to_string(),
            name: id.to_lowercase(),
            ontology,
            genes: genes.iter().map(|g| g.to_string()).collect(),
        }
    }

    #[test]
    fn test_scope_membership() {
        assert!(OntologyScope::GO.contains(Ontology::MF));
        assert!(!OntologyScope::GO.contains(Ontology::KEGG));
        assert!(OntologyScope::ALL.contains(Ontology::KEGG));
        assert!(!OntologyScope::BP.contains(Ontology::CC));
        assert_eq!("kegg".parse::<OntologyScope>().unwrap(), OntologyScope::KEGG);
        assert!("XX".parse::<Ontology>().is_err());
    }

    #[test]
    fn test_annotation_table_groups_terms() {
        let mut file = Builder::new().suffix(".tsv").tempfile().unwrap();
        writeln!(file, "term_id\tterm_name\tontology\tgene_id").unwrap();
        writeln!(file, "GO:1\tcell cycle\tBP\tg1").unwrap();
        writeln!(file, "GO:1\tcell cycle\tBP\tg2").unwrap();
        writeln!(file, "GO:1\tcell cycle\tBP\tg2").unwrap();
        writeln!(file, "hsa1\tglycolysis\tKEGG\tg3").unwrap();
        let c = GeneSetCollection::from_annotation_table(file.path()).unwrap();
        assert_eq!(c.len(), 2);
        let go = c.get("GO:1").unwrap();
        assert_eq!(go.genes, vec!["g1", "g2"]);
        assert_eq!(go.name, "cell cycle");
        assert_eq!(c.get("hsa1").unwrap().ontology, Ontology::KEGG);
    }

    #[test]
    fn test_annotation_table_rejects_unknown_ontology() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "term_id,term_name,ontology,gene_id").unwrap();
        writeln!(file, "T1,x,REACTOME,g1").unwrap();
        assert!(matches!(
            GeneSetCollection::from_annotation_table(file.path()),
            Err(PipelineError::InvalidGeneSets { .. })
        ));
    }

    #[test]
    fn test_gmt_reader() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "hsa00010\tGlycolysis\tg1\tg2\tg1").unwrap();
        writeln!(file, "hsa00020\tna\tg3").unwrap();
        let c = GeneSetCollection::from_gmt(file.path(), Ontology::KEGG).unwrap();
        assert_eq!(c.sets()[0].genes, vec!["g1", "g2"]);
        assert_eq!(c.sets()[1].name, "hsa00020");
        assert!(c.sets().iter().all(|s| s.ontology == Ontology::KEGG));
    }

    #[test]
    fn test_restrict_scope_universe_and_size() {
        let c = GeneSetCollection::new(vec![
            set("A", Ontology::BP, &["g1", "g2", "g3", "x"]),
            set("B", Ontology::KEGG, &["g1", "g2", "g3"]),
            set("C", Ontology::MF, &["g1", "y", "z"]),
            set("D", Ontology::CC, &["g1", "g2", "g3", "g4", "g5"]),
        ]);
        let universe: HashSet<&str> = ["g1", "g2", "g3", "g4"].into_iter().collect();
        let r = c.restrict(OntologyScope::GO, &universe, 2, 3);
        let ids: Vec<&str> = r.sets().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["A"]);
        assert_eq!(r.sets()[0].genes, vec!["g1", "g2", "g3"]);

        let all = c.restrict(OntologyScope::ALL, &universe, 1, 10);
        assert_eq!(all.len(), 4);
        assert_eq!(all.get("D").unwrap().len(), 4);
    }

    #[test]
    fn test_extend_merges_same_term() {
        let mut a = GeneSetCollection::new(vec![set("A", Ontology::BP, &["g1"])]);
        a.extend(GeneSetCollection::new(vec![
            set("A", Ontology::BP, &["g1", "g2"]),
            set("A", Ontology::MF, &["g3"]),
        ]));
        assert_eq!(a.len(), 2);
        assert_eq!(a.sets()[0].genes, vec!["g1", "g2"]);
    }
}
