use serde::{Deserialize, Serialize};

/// A tradable listing in the fixed universe. Static configuration: never
/// mutated after universe construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub name: String,
    pub sector: String,
}

/// Ordered collection of instruments the pipeline operates on.
#[derive(Debug, Clone)]
pub struct Universe {
    instruments: Vec<Instrument>,
}

/// The covered ASX listings: (symbol, name, sector).
const ASX_UNIVERSE: &[(&str, &str, &str)] = &[
    ("ALL.AX", "Aristocrat Leisure", "Technology"),
    ("ANZ.AX", "ANZ Group", "Financials"),
    ("BHP.AX", "BHP Group", "Materials"),
    ("CBA.AX", "Commonwealth Bank", "Financials"),
    ("CSL.AX", "CSL Limited", "Healthcare"),
    ("FMG.AX", "Fortescue", "Materials"),
    ("MQG.AX", "Macquarie Group", "Financials"),
    ("NAB.AX", "National Australia Bank", "Financials"),
    ("RIO.AX", "Rio Tinto", "Materials"),
    ("STO.AX", "Santos", "Energy"),
    ("TLS.AX", "Telstra Group", "Telecom"),
    ("WBC.AX", "Westpac Banking", "Financials"),
    ("WDS.AX", "Woodside Energy", "Energy"),
    ("WES.AX", "Wesfarmers", "Consumer"),
    ("WOW.AX", "Woolworths Group", "Consumer"),
];

impl Universe {
    pub fn new(instruments: Vec<Instrument>) -> Self {
        Self { instruments }
    }

    /// The default ASX equity universe.
    pub fn asx_default() -> Self {
        let instruments = ASX_UNIVERSE
            .iter()
            .map(|(symbol, name, sector)| Instrument {
                symbol: (*symbol).to_string(),
                name: (*name).to_string(),
                sector: (*sector).to_string(),
            })
            .collect();
        Self { instruments }
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    pub fn symbols(&self) -> Vec<String> {
        self.instruments.iter().map(|i| i.symbol.clone()).collect()
    }

    pub fn get(&self, symbol: &str) -> Option<&Instrument> {
        self.instruments.iter().find(|i| i.symbol == symbol)
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_universe_has_unique_symbols() {
        let universe = Universe::asx_default();
        assert_eq!(universe.len(), 15);

        let mut symbols = universe.symbols();
        symbols.sort();
        symbols.dedup();
        assert_eq!(symbols.len(), 15);
    }

    #[test]
    fn lookup_by_symbol() {
        let universe = Universe::asx_default();
        let cba = universe.get("CBA.AX").unwrap();
        assert_eq!(cba.sector, "Financials");
        assert!(universe.get("MISSING.AX").is_none());
    }
}
