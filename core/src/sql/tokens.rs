/// SQL keywords, operators and punctuation.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    // Statements
    SELECT,
    FROM,
    WHERE,
    INSERT,
    INTO,
    VALUES,
    UPDATE,
    SET,
    DELETE,
    RETURNING,
    CREATE,
    TABLE,
    IF,
    EXISTS,

    // Clauses
    ORDER,
    BY,
    ASC,
    DESC,
    LIMIT,
    OFFSET,
    AS,
    DEFAULT,
    PRIMARY,
    KEY,

    // Logic
    AND,
    OR,
    NOT,
    IN,
    IS,
    NULL,
    LIKE,
    ILIKE,
    SIMILAR,
    TO,
    TRUE,
    FALSE,

    // Punctuation
    LPAREN,
    RPAREN,
    COMMA,
    SEMI,
    DOT,
    STAR,

    // Comparison
    EQ,
    NE,
    LT,
    GT,
    LE,
    GE,
}

impl Token {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Token::SELECT => "SELECT",
            Token::FROM => "FROM",
            Token::WHERE => "WHERE",
            Token::INSERT => "INSERT",
            Token::INTO => "INTO",
            Token::VALUES => "VALUES",
            Token::UPDATE => "UPDATE",
            Token::SET => "SET",
            Token::DELETE => "DELETE",
            Token::RETURNING => "RETURNING",
            Token::CREATE => "CREATE",
            Token::TABLE => "TABLE",
            Token::IF => "IF",
            Token::EXISTS => "EXISTS",
            Token::ORDER => "ORDER",
            Token::BY => "BY",
            Token::ASC => "ASC",
            Token::DESC => "DESC",
            Token::LIMIT => "LIMIT",
            Token::OFFSET => "OFFSET",
            Token::AS => "AS",
            Token::DEFAULT => "DEFAULT",
            Token::PRIMARY => "PRIMARY",
            Token::KEY => "KEY",
            Token::AND => "AND",
            Token::OR => "OR",
            Token::NOT => "NOT",
            Token::IN => "IN",
            Token::IS => "IS",
            Token::NULL => "NULL",
            Token::LIKE => "LIKE",
            Token::ILIKE => "ILIKE",
            Token::SIMILAR => "SIMILAR",
            Token::TO => "TO",
            Token::TRUE => "TRUE",
            Token::FALSE => "FALSE",
            Token::LPAREN => "(",
            Token::RPAREN => ")",
            Token::COMMA => ",",
            Token::SEMI => ";",
            Token::DOT => ".",
            Token::STAR => "*",
            Token::EQ => "=",
            Token::NE => "<>",
            Token::LT => "<",
            Token::GT => ">",
            Token::LE => "<=",
            Token::GE => ">=",
        }
    }

    /// Comparison operators get a space on both sides.
    #[inline]
    pub const fn is_operator(&self) -> bool {
        matches!(
            self,
            Token::EQ | Token::NE | Token::LT | Token::GT | Token::LE | Token::GE
        )
    }
}

impl core::fmt::Display for Token {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
